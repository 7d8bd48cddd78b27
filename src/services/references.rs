//! Name lists attached to a vulnerability: references, policy violations,
//! CVEs and tags. Written per vulnerability, loaded in batches per page.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use sqlx::{PgPool, Postgres, Transaction};

use crate::errors::AppError;

fn cve_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").expect("static regex"))
}

/// References split by the family they name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifiedRefs {
    pub owasp: Vec<String>,
    pub cwe: Vec<String>,
    pub cvss: Vec<String>,
}

/// Classify references by case-insensitive substring. A reference may land
/// in several families.
pub fn classify(refs: &[String]) -> ClassifiedRefs {
    let mut out = ClassifiedRefs::default();
    for r in refs {
        let lower = r.to_lowercase();
        if lower.contains("owasp") {
            out.owasp.push(r.clone());
        }
        if lower.contains("cwe") {
            out.cwe.push(r.clone());
        }
        if lower.contains("cvss") {
            out.cvss.push(r.clone());
        }
    }
    out
}

/// CVE identifiers mentioned in `refs`, upper-cased and deduplicated.
pub fn extract_cves(refs: &[String]) -> Vec<String> {
    let found: BTreeSet<String> = refs
        .iter()
        .flat_map(|r| cve_regex().find_iter(r).map(|m| m.as_str().to_uppercase()))
        .collect();
    found.into_iter().collect()
}

/// Trim, drop empties and deduplicate while keeping first-seen order.
pub fn normalize(names: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum NameTable {
    References,
    PolicyViolations,
    Cves,
}

impl NameTable {
    fn table(&self) -> &'static str {
        match self {
            Self::References => "vulnerability_references",
            Self::PolicyViolations => "vulnerability_policy_violations",
            Self::Cves => "vulnerability_cves",
        }
    }
}

async fn replace_names(
    tx: &mut Transaction<'_, Postgres>,
    table: NameTable,
    vuln_id: i64,
    names: &[String],
) -> Result<(), AppError> {
    let table = table.table();
    sqlx::query(&format!("DELETE FROM {table} WHERE vulnerability_id = $1"))
        .bind(vuln_id)
        .execute(&mut **tx)
        .await?;

    let names = normalize(names);
    if !names.is_empty() {
        sqlx::query(&format!(
            "INSERT INTO {table} (vulnerability_id, name) \
             SELECT $1, UNNEST($2::text[]) ON CONFLICT DO NOTHING"
        ))
        .bind(vuln_id)
        .bind(&names)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Replace references; CVE ids they mention are added to the CVE list.
pub async fn replace_references(
    tx: &mut Transaction<'_, Postgres>,
    vuln_id: i64,
    refs: &[String],
) -> Result<(), AppError> {
    replace_names(tx, NameTable::References, vuln_id, refs).await?;

    let cves = extract_cves(refs);
    if !cves.is_empty() {
        sqlx::query(
            "INSERT INTO vulnerability_cves (vulnerability_id, name) \
             SELECT $1, UNNEST($2::text[]) ON CONFLICT DO NOTHING",
        )
        .bind(vuln_id)
        .bind(&cves)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn replace_policy_violations(
    tx: &mut Transaction<'_, Postgres>,
    vuln_id: i64,
    names: &[String],
) -> Result<(), AppError> {
    replace_names(tx, NameTable::PolicyViolations, vuln_id, names).await
}

pub async fn replace_cves(
    tx: &mut Transaction<'_, Postgres>,
    vuln_id: i64,
    names: &[String],
) -> Result<(), AppError> {
    let names: Vec<String> = names.iter().map(|n| n.trim().to_uppercase()).collect();
    replace_names(tx, NameTable::Cves, vuln_id, &names).await
}

/// Replace tags, creating unknown tag names on the fly.
pub async fn replace_tags(
    tx: &mut Transaction<'_, Postgres>,
    vuln_id: i64,
    tags: &[String],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM vulnerability_tags WHERE vulnerability_id = $1")
        .bind(vuln_id)
        .execute(&mut **tx)
        .await?;

    let tags = normalize(tags);
    if tags.is_empty() {
        return Ok(());
    }

    sqlx::query("INSERT INTO tags (name) SELECT UNNEST($1::text[]) ON CONFLICT (name) DO NOTHING")
        .bind(&tags)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO vulnerability_tags (vulnerability_id, tag_id) \
         SELECT $1, id FROM tags WHERE name = ANY($2) ON CONFLICT DO NOTHING",
    )
    .bind(vuln_id)
    .bind(&tags)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Name lists of a page of vulnerabilities, keyed by vulnerability id.
#[derive(Debug, Default)]
pub struct NameLists {
    pub tags: HashMap<i64, Vec<String>>,
    pub refs: HashMap<i64, Vec<String>>,
    pub policy_violations: HashMap<i64, Vec<String>>,
    pub cves: HashMap<i64, Vec<String>>,
}

#[derive(sqlx::FromRow)]
struct NameRow {
    vulnerability_id: i64,
    name: String,
}

fn group(rows: Vec<NameRow>) -> HashMap<i64, Vec<String>> {
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        map.entry(row.vulnerability_id).or_default().push(row.name);
    }
    map
}

async fn fetch_names(pool: &PgPool, sql: &str, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>, AppError> {
    let rows = sqlx::query_as::<_, NameRow>(sql)
        .bind(ids)
        .fetch_all(pool)
        .await?;
    Ok(group(rows))
}

/// Load every name list for `ids` with one query per list.
pub async fn load(pool: &PgPool, ids: &[i64]) -> Result<NameLists, AppError> {
    if ids.is_empty() {
        return Ok(NameLists::default());
    }

    let (tags, refs, policy_violations, cves) = tokio::try_join!(
        fetch_names(
            pool,
            "SELECT vt.vulnerability_id, t.name FROM vulnerability_tags vt \
             JOIN tags t ON t.id = vt.tag_id WHERE vt.vulnerability_id = ANY($1) ORDER BY t.name",
            ids,
        ),
        fetch_names(
            pool,
            "SELECT vulnerability_id, name FROM vulnerability_references \
             WHERE vulnerability_id = ANY($1) ORDER BY id",
            ids,
        ),
        fetch_names(
            pool,
            "SELECT vulnerability_id, name FROM vulnerability_policy_violations \
             WHERE vulnerability_id = ANY($1) ORDER BY id",
            ids,
        ),
        fetch_names(
            pool,
            "SELECT vulnerability_id, name FROM vulnerability_cves \
             WHERE vulnerability_id = ANY($1) ORDER BY id",
            ids,
        ),
    )?;

    Ok(NameLists {
        tags,
        refs,
        policy_violations,
        cves,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classify_by_substring() {
        let refs = strings(&[
            "OWASP Top 10 A03",
            "cwe-89",
            "CVSS:3.1/AV:N",
            "https://example.com/advisory",
        ]);
        let c = classify(&refs);
        assert_eq!(c.owasp, strings(&["OWASP Top 10 A03"]));
        assert_eq!(c.cwe, strings(&["cwe-89"]));
        assert_eq!(c.cvss, strings(&["CVSS:3.1/AV:N"]));
    }

    #[test]
    fn extracts_cve_ids() {
        let refs = strings(&[
            "see cve-2021-44228 and CVE-2021-44228",
            "CVE-2014-0160",
            "CVE-99-1",
        ]);
        assert_eq!(extract_cves(&refs), strings(&["CVE-2014-0160", "CVE-2021-44228"]));
    }

    #[test]
    fn normalize_trims_and_deduplicates() {
        let names = strings(&[" a ", "b", "a", "", "  "]);
        assert_eq!(normalize(&names), strings(&["a", "b"]));
    }
}
