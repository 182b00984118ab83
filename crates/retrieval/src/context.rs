use finrag_vector_store::{Document, SearchResult, GENERAL_DOC_TYPE};
use std::collections::{BTreeMap, HashSet};

/// Hits fetched for a context request.
pub const CONTEXT_TOP_K: usize = 10;

/// Buckets a context response can contain; any other document type lands in `general`.
pub const KNOWN_BUCKETS: [&str; 5] = ["market_data", "earnings", "filings", "news", GENERAL_DOC_TYPE];

/// Bucket name for a stored document type. Storage keeps the original value.
#[must_use]
pub fn bucket_for(doc_type: &str) -> &'static str {
    KNOWN_BUCKETS
        .iter()
        .copied()
        .find(|bucket| *bucket == doc_type)
        .unwrap_or(GENERAL_DOC_TYPE)
}

/// Group `results` by bucket in rank order, then keep only the `wanted` buckets.
///
/// Every known bucket is present (possibly empty) when `wanted` is `None` or empty; with a
/// restriction, unrequested buckets are dropped and requested unknown names never appear.
#[must_use]
pub fn bucket_by_type(
    results: Vec<SearchResult>,
    wanted: Option<&HashSet<String>>,
) -> BTreeMap<String, Vec<Document>> {
    let mut context: BTreeMap<String, Vec<Document>> = KNOWN_BUCKETS
        .iter()
        .map(|bucket| ((*bucket).to_string(), Vec::new()))
        .collect();
    for result in results {
        let bucket = bucket_for(&result.document.doc_type);
        context
            .entry(bucket.to_string())
            .or_default()
            .push(result.document);
    }

    match wanted {
        Some(wanted) if !wanted.is_empty() => {
            context.retain(|bucket, _| wanted.contains(bucket));
            context
        }
        _ => context,
    }
}

/// `top_score` when it is strictly above `threshold`, else 0.
#[must_use]
pub fn gated_confidence(top_score: Option<f32>, threshold: f32) -> f32 {
    match top_score {
        Some(score) if score > threshold => score,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finrag_vector_store::SearchResult;
    use pretty_assertions::assert_eq;

    fn hit(id: u64, doc_type: &str, score: f32) -> SearchResult {
        SearchResult {
            document: Document {
                id,
                content: format!("doc {id}"),
                doc_type: doc_type.to_string(),
                ticker: None,
                added_at: 0,
            },
            similarity_score: score,
        }
    }

    #[test]
    fn unknown_types_fall_into_general_without_being_rewritten() {
        let context = bucket_by_type(
            vec![hit(0, "earnings", 0.9), hit(1, "analyst_note", 0.8)],
            None,
        );

        assert_eq!(context.len(), KNOWN_BUCKETS.len());
        assert_eq!(context["earnings"].len(), 1);
        let general = &context["general"];
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].doc_type, "analyst_note");
    }

    #[test]
    fn restriction_drops_unrequested_buckets() {
        let wanted: HashSet<String> = ["earnings".to_string(), "crypto".to_string()].into();
        let context = bucket_by_type(
            vec![
                hit(0, "general", 0.95),
                hit(1, "earnings", 0.7),
                hit(2, "earnings", 0.6),
            ],
            Some(&wanted),
        );

        assert_eq!(context.keys().collect::<Vec<_>>(), vec!["earnings"]);
        let ids: Vec<u64> = context["earnings"].iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn empty_restriction_means_everything() {
        let context = bucket_by_type(vec![hit(0, "news", 0.5)], Some(&HashSet::new()));
        assert_eq!(context.len(), KNOWN_BUCKETS.len());
    }

    #[test]
    fn confidence_is_gated_top_score() {
        assert!((gated_confidence(Some(0.8), 0.7) - 0.8).abs() < f32::EPSILON);
        assert_eq!(gated_confidence(Some(0.7), 0.7), 0.0);
        assert_eq!(gated_confidence(Some(0.3), 0.7), 0.0);
        assert_eq!(gated_confidence(Some(-0.2), 0.0), 0.0);
        assert_eq!(gated_confidence(None, 0.0), 0.0);
    }
}
