//! Hostname predicates have no column on the vulnerability table; they are
//! pulled out of the tree here and re-applied through explicit joins.

use super::{FilterNode, Predicate};

/// Field name of predicates that match on host DNS names.
pub const HOSTNAMES_FIELD: &str = "hostnames";

/// Split `nodes` into the tree without hostname leaves and the extracted
/// hostname predicates, in encounter order. `and`/`or` groups left empty by
/// the extraction are dropped.
pub fn split_hostname_filters(nodes: Vec<FilterNode>) -> (Vec<FilterNode>, Vec<Predicate>) {
    let mut remaining = Vec::with_capacity(nodes.len());
    let mut hostnames = Vec::new();

    for node in nodes {
        match node {
            FilterNode::Leaf(predicate) if predicate.name == HOSTNAMES_FIELD => {
                hostnames.push(predicate);
            }
            FilterNode::Leaf(predicate) => remaining.push(FilterNode::Leaf(predicate)),
            FilterNode::Or { or } => {
                let (kept, found) = split_hostname_filters(or);
                if !kept.is_empty() {
                    remaining.push(FilterNode::Or { or: kept });
                }
                hostnames.extend(found);
            }
            FilterNode::And { and } => {
                let (kept, found) = split_hostname_filters(and);
                if !kept.is_empty() {
                    remaining.push(FilterNode::And { and: kept });
                }
                hostnames.extend(found);
            }
        }
    }

    (remaining, hostnames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterQuery;
    use serde_json::{json, Value};

    fn split(doc: Value) -> (Value, Value) {
        let query = FilterQuery::from_value(&doc).unwrap();
        let (tree, hostnames) = split_hostname_filters(query.filters);
        (
            json!({ "filters": tree }),
            serde_json::to_value(hostnames).unwrap(),
        )
    }

    #[test]
    fn documented_example() {
        let (tree, hostnames) = split(json!({"filters":[{"or":[
            {"name":"hostnames","op":"==","val":"a.com"},
            {"and":[{"name":"severity","op":"==","val":"high"}]}
        ]}]}));
        assert_eq!(
            tree,
            json!({"filters":[{"or":[{"and":[{"name":"severity","op":"==","val":"high"}]}]}]})
        );
        assert_eq!(hostnames, json!([{"name":"hostnames","op":"==","val":"a.com"}]));
    }

    #[test]
    fn tree_without_hostnames_is_unchanged() {
        let doc = json!({"filters":[
            {"name":"name","op":"ilike","val":"%xss%"},
            {"or":[{"name":"severity","op":"==","val":"high"},
                   {"and":[{"name":"confirmed","op":"==","val":true},
                           {"name":"status","op":"!=","val":"closed"}]}]}
        ]});
        let (tree, hostnames) = split(doc.clone());
        assert_eq!(tree, doc);
        assert_eq!(hostnames, json!([]));
    }

    #[test]
    fn deep_extraction_drops_empty_groups() {
        let (tree, hostnames) = split(json!({"filters":[
            {"and":[{"or":[{"name":"hostnames","op":"==","val":"a.com"}]}]},
            {"name":"hostnames","op":"==","val":"b.com"},
            {"name":"severity","op":"==","val":"low"}
        ]}));
        assert_eq!(
            tree,
            json!({"filters":[{"name":"severity","op":"==","val":"low"}]})
        );
        assert_eq!(
            hostnames,
            json!([
                {"name":"hostnames","op":"==","val":"a.com"},
                {"name":"hostnames","op":"==","val":"b.com"}
            ])
        );
    }

    #[test]
    fn every_hostname_leaf_extracted_exactly_once() {
        let query = FilterQuery::from_value(&json!({"filters":[
            {"or":[{"name":"hostnames","op":"==","val":"x"},
                   {"and":[{"name":"hostnames","op":"==","val":"y"},
                           {"name":"name","op":"==","val":"n"}]}]},
            {"name":"hostnames","op":"==","val":"z"}
        ]}))
        .unwrap();
        let leaves_before = query.filters.iter().flat_map(|n| n.leaves()).count();
        let (tree, hostnames) = split_hostname_filters(query.filters);

        assert_eq!(hostnames.len(), 3);
        let remaining: Vec<_> = tree.iter().flat_map(|n| n.leaves()).collect();
        assert!(remaining.iter().all(|p| p.name != HOSTNAMES_FIELD));
        assert_eq!(remaining.len() + hostnames.len(), leaves_before);
    }
}
