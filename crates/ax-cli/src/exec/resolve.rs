//! Allocation identifier resolution

use ax_core::traits::ControlPlane;
use ax_core::{AllocationStub, ResolveError, MIN_PREFIX_LEN};

/// Resolve a full id or unique prefix to exactly one allocation.
///
/// Queries the control plane on every call.
pub async fn resolve_allocation<C>(
    control_plane: &C,
    prefix: &str,
) -> Result<AllocationStub, ResolveError>
where
    C: ControlPlane + ?Sized,
{
    if prefix.chars().count() < MIN_PREFIX_LEN {
        return Err(ResolveError::TooShort(prefix.to_string()));
    }

    let mut matches: Vec<AllocationStub> = control_plane
        .list_allocations(Some(prefix))
        .await
        .map_err(ResolveError::Query)?
        .into_iter()
        .filter(|alloc| alloc.matches_prefix(prefix))
        .collect();

    match matches.len() {
        0 => Err(ResolveError::NotFound(prefix.to_string())),
        1 => Ok(matches.remove(0)),
        // An exact id that also prefixes another id is still ambiguous
        _ => Err(ResolveError::Ambiguous {
            prefix: prefix.to_string(),
            candidates: matches,
        }),
    }
}

/// Allocation ids completing the partial last argument
pub async fn predict_allocation_ids<C>(control_plane: &C, last: &str) -> Vec<String>
where
    C: ControlPlane + ?Sized,
{
    let prefix = (!last.is_empty()).then_some(last);
    match control_plane.list_allocations(prefix).await {
        Ok(allocs) => allocs
            .into_iter()
            .filter(|alloc| alloc.matches_prefix(last))
            .map(|alloc| alloc.id)
            .collect(),
        Err(e) => {
            tracing::debug!("Completion query failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ax_core::{ClientStatus, ConnectionError, NodeStub};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakePlane {
        ids: Vec<&'static str>,
        fail: bool,
        queries: AtomicUsize,
    }

    impl FakePlane {
        fn new(ids: Vec<&'static str>) -> Self {
            Self {
                ids,
                fail: false,
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ControlPlane for FakePlane {
        async fn list_allocations(
            &self,
            _prefix: Option<&str>,
        ) -> Result<Vec<AllocationStub>, ConnectionError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConnectionError::Timeout("nope:4646".into()));
            }
            // Ignores the filter so client-side matching is exercised
            Ok(self
                .ids
                .iter()
                .map(|id| AllocationStub {
                    id: id.to_string(),
                    name: "example.web[0]".into(),
                    node_id: "node".into(),
                    task_group: "web".into(),
                    tasks: vec!["web".into()],
                    client_status: ClientStatus::Running,
                })
                .collect())
        }

        async fn get_allocation(&self, alloc_id: &str) -> Result<AllocationStub, ConnectionError> {
            Err(ConnectionError::Lost(alloc_id.to_string()))
        }

        async fn list_nodes(&self) -> Result<Vec<NodeStub>, ConnectionError> {
            Ok(vec![])
        }
    }

    const A: &str = "26470238-5cf2-438f-8772-dc67cfb0705c";
    const B: &str = "26471111-0000-0000-0000-000000000000";
    const C: &str = "9a1b2c3d-0000-0000-0000-000000000000";

    #[tokio::test]
    async fn test_unique_prefix_resolves() {
        let plane = FakePlane::new(vec![A, B, C]);
        assert_eq!(resolve_allocation(&plane, "26470").await.unwrap().id, A);
        assert_eq!(resolve_allocation(&plane, "9A").await.unwrap().id, C);
        assert_eq!(resolve_allocation(&plane, A).await.unwrap().id, A);
    }

    #[tokio::test]
    async fn test_ambiguous_lists_every_match() {
        let plane = FakePlane::new(vec![A, B, C]);
        match resolve_allocation(&plane, "2647").await {
            Err(ResolveError::Ambiguous { prefix, candidates }) => {
                assert_eq!(prefix, "2647");
                let ids: Vec<_> = candidates.iter().map(|c| c.id.as_str()).collect();
                assert_eq!(ids, vec![A, B]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exact_id_prefixing_another_is_ambiguous() {
        let plane = FakePlane::new(vec!["web-1", "web-10"]);
        match resolve_allocation(&plane, "web-1").await {
            Err(ResolveError::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(resolve_allocation(&plane, "web-10").await.unwrap().id, "web-10");
    }

    #[tokio::test]
    async fn test_not_found() {
        let plane = FakePlane::new(vec![A]);
        let err = resolve_allocation(&plane, "ffff").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(ref p) if p == "ffff"));
    }

    #[tokio::test]
    async fn test_too_short_skips_query() {
        let plane = FakePlane::new(vec![A]);
        let err = resolve_allocation(&plane, "2").await.unwrap_err();
        assert!(matches!(err, ResolveError::TooShort(_)));
        assert_eq!(plane.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_failure() {
        let mut plane = FakePlane::new(vec![A]);
        plane.fail = true;
        let err = resolve_allocation(&plane, "2647").await.unwrap_err();
        assert!(err.to_string().starts_with("Error querying allocation"));
    }

    #[tokio::test]
    async fn test_every_call_queries() {
        let plane = FakePlane::new(vec![A]);
        resolve_allocation(&plane, "2647").await.unwrap();
        resolve_allocation(&plane, "2647").await.unwrap();
        assert_eq!(plane.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prediction() {
        let plane = FakePlane::new(vec![A, B, C]);
        assert_eq!(predict_allocation_ids(&plane, &A[..5]).await, vec![A.to_string()]);
        assert_eq!(predict_allocation_ids(&plane, "").await.len(), 3);

        let mut failing = FakePlane::new(vec![A]);
        failing.fail = true;
        assert!(predict_allocation_ids(&failing, "26").await.is_empty());
    }
}
