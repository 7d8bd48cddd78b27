//! Seed script for development — populates a fresh database with sample data.
//!
//! Usage: `cargo run --bin seed`
//!
//! Requires `DATABASE_URL` (reads .env).

use anyhow::Context;
use sqlx::PgPool;
use vulntrack::models::user::UserRole;
use vulntrack::services::auth;

const ADMIN_PASSWORD: &str = "Test123!";
const WORKSPACE: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = vulntrack::db::create_pool(&db_url, 5).await?;

    // Run migrations first
    vulntrack::db::run_migrations(&pool).await?;

    println!("=== vulntrack Seed Script ===");

    seed_users(&pool).await?;
    let workspace_id = seed_workspace(&pool).await?;
    seed_custom_fields(&pool).await?;
    seed_vulnerabilities(&pool, workspace_id).await?;

    println!("\n=== Seed complete! ===");
    println!("Admin login: admin / {ADMIN_PASSWORD}");

    Ok(())
}

async fn seed_users(pool: &PgPool) -> anyhow::Result<()> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = 'admin')")
            .fetch_one(pool)
            .await?;

    if exists {
        // Update password for existing admin user
        let hash = auth::hash_password(ADMIN_PASSWORD)?;
        sqlx::query("UPDATE users SET password_hash = $1 WHERE username = 'admin'")
            .bind(&hash)
            .execute(pool)
            .await?;
        println!("[done] Updated admin password");
        return Ok(());
    }

    auth::create_user(pool, "admin", "admin@vulntrack.local", ADMIN_PASSWORD, UserRole::Admin)
        .await?;
    auth::create_user(
        pool,
        "pentester",
        "pentester@vulntrack.local",
        "pentester123",
        UserRole::Pentester,
    )
    .await?;
    auth::create_user(pool, "client", "client@vulntrack.local", "client123", UserRole::Client)
        .await?;

    println!("[done] Created admin, pentester and client users");
    Ok(())
}

async fn seed_workspace(pool: &PgPool) -> anyhow::Result<i64> {
    let workspace_id: i64 = sqlx::query_scalar(
        "INSERT INTO workspaces (name, description) VALUES ($1, 'Demo engagement') \
         ON CONFLICT (name) DO UPDATE SET description = EXCLUDED.description RETURNING id",
    )
    .bind(WORKSPACE)
    .fetch_one(pool)
    .await?;

    println!("[done] Workspace '{WORKSPACE}' (id {workspace_id})");
    Ok(workspace_id)
}

async fn seed_custom_fields(pool: &PgPool) -> anyhow::Result<()> {
    let fields = [
        ("ticket", "int", "Ticket", 1),
        ("owner_team", "str", "Owner team", 2),
        ("affected_releases", "list", "Affected releases", 3),
    ];
    for (name, kind, display, order) in fields {
        sqlx::query(
            "INSERT INTO custom_fields_schema (field_name, field_type, field_display_name, field_order) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (table_name, field_name) DO NOTHING",
        )
        .bind(name)
        .bind(kind)
        .bind(display)
        .bind(order)
        .execute(pool)
        .await?;
    }
    println!("[done] Custom fields");
    Ok(())
}

async fn seed_vulnerabilities(pool: &PgPool, workspace_id: i64) -> anyhow::Result<()> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM vulnerabilities WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_one(pool)
            .await?;
    if count > 0 {
        println!("[skip] Vulnerabilities already seeded ({count})");
        return Ok(());
    }

    let creator: uuid::Uuid =
        sqlx::query_scalar("SELECT id FROM users WHERE username = 'pentester'")
            .fetch_one(pool)
            .await?;

    let mut tx = pool.begin().await?;

    let host_id: i64 = sqlx::query_scalar(
        "INSERT INTO hosts (workspace_id, ip, os) VALUES ($1, '10.0.0.5', 'Linux') RETURNING id",
    )
    .bind(workspace_id)
    .fetch_one(&mut *tx)
    .await?;

    for hostname in ["app.demo.local", "www.demo.local"] {
        sqlx::query("INSERT INTO hostnames (host_id, workspace_id, name) VALUES ($1, $2, $3)")
            .bind(host_id)
            .bind(workspace_id)
            .bind(hostname)
            .execute(&mut *tx)
            .await?;
    }

    let service_id: i64 = sqlx::query_scalar(
        "INSERT INTO services (host_id, workspace_id, name, port, protocol, version) \
         VALUES ($1, $2, 'https', 443, 'tcp', 'nginx 1.24') RETURNING id",
    )
    .bind(host_id)
    .bind(workspace_id)
    .fetch_one(&mut *tx)
    .await?;

    let command_id: i64 = sqlx::query_scalar(
        "INSERT INTO commands (workspace_id, tool, command, user_id) \
         VALUES ($1, 'nmap', 'nmap -sV 10.0.0.5', $2) RETURNING id",
    )
    .bind(workspace_id)
    .bind(creator)
    .fetch_one(&mut *tx)
    .await?;

    let host_vulns = [
        ("OpenSSH user enumeration", "medium", true, "CVE-2018-15473"),
        ("ICMP timestamp disclosure", "informational", false, ""),
        ("Outdated kernel", "high", true, "CVE-2022-0847"),
    ];
    for (name, severity, confirmed, cve) in host_vulns {
        let vuln_id: i64 = sqlx::query_scalar(
            "INSERT INTO vulnerabilities (workspace_id, type, name, severity, confirmed, tool, \
             host_id, creator_id, update_user_id, creator_command_id) \
             VALUES ($1, 'vulnerability', $2, $3::severity_level, $4, 'nmap', $5, $6, $6, $7) \
             RETURNING id",
        )
        .bind(workspace_id)
        .bind(name)
        .bind(severity)
        .bind(confirmed)
        .bind(host_id)
        .bind(creator)
        .bind(command_id)
        .fetch_one(&mut *tx)
        .await?;

        if !cve.is_empty() {
            for table in ["vulnerability_references", "vulnerability_cves"] {
                let sql = format!("INSERT INTO {table} (vulnerability_id, name) VALUES ($1, $2)");
                sqlx::query(&sql)
                    .bind(vuln_id)
                    .bind(cve)
                    .execute(&mut *tx)
                    .await?;
            }
        }
    }

    let web_vulns = [
        ("Reflected XSS", "high", "/search", "GET", 200),
        ("SQL injection", "critical", "/login", "POST", 500),
        ("Missing security headers", "low", "/", "GET", 200),
    ];
    for (name, severity, path, method, status_code) in web_vulns {
        sqlx::query(
            "INSERT INTO vulnerabilities (workspace_id, type, name, severity, tool, service_id, \
             creator_id, update_user_id, website, path, method, status_code) \
             VALUES ($1, 'vulnerability_web', $2, $3::severity_level, 'Web UI', $4, $5, $5, \
             'https://app.demo.local', $6, $7, $8)",
        )
        .bind(workspace_id)
        .bind(name)
        .bind(severity)
        .bind(service_id)
        .bind(creator)
        .bind(path)
        .bind(method)
        .bind(status_code)
        .execute(&mut *tx)
        .await?;
    }

    let tag_id: i64 = sqlx::query_scalar(
        "INSERT INTO tags (name) VALUES ('pci') ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
         RETURNING id",
    )
    .fetch_one(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO vulnerability_tags (vulnerability_id, tag_id) \
         SELECT id, $2 FROM vulnerabilities WHERE workspace_id = $1 AND severity >= 'high'",
    )
    .bind(workspace_id)
    .bind(tag_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    println!("[done] Seeded host, service and 6 vulnerabilities");
    Ok(())
}
