//! Route selection.

use crate::error::{Error, Result};
use crate::types::Route;

/// Pick the best route of an already ranked catalog.
///
/// The catalog is trusted to be sorted; the first entry wins even when
/// every route scored 0.
pub fn select_best(ranked: &[Route]) -> Result<Route> {
    ranked.first().cloned().ok_or(Error::NoRoutesAvailable)
}

/// Sort routes by descending score. Ties keep their relative order.
pub fn rank(routes: &mut [Route]) {
    routes.sort_by(|a, b| b.score().total_cmp(&a.score()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSample;
    use crate::types::{RouteId, RouteKind};

    fn route(id: &str, latency: f64) -> Route {
        let mut route = Route::new(
            RouteId::from(id),
            id,
            RouteKind::PhysicalInterface,
            "10.0.0.1".parse().unwrap(),
            None,
        );
        route.record(MetricsSample::measured(Some(latency), 0.0, 1.0, 0.0, 0.0));
        route
    }

    #[test]
    fn test_empty_catalog() {
        assert!(matches!(select_best(&[]), Err(Error::NoRoutesAvailable)));
    }

    #[test]
    fn test_first_wins_without_resorting() {
        let unsorted = vec![route("slow", 90.0), route("fast", 5.0)];
        assert_eq!(select_best(&unsorted).unwrap().id.as_str(), "slow");
    }

    #[test]
    fn test_rank_descending_and_stable() {
        let mut routes = vec![
            route("a", 50.0),
            route("b", 10.0),
            route("c", 50.0),
        ];
        let mut failed = route("d", 1.0);
        failed.record(MetricsSample::failed("boom"));
        routes.push(failed);

        rank(&mut routes);
        let ids: Vec<_> = routes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c", "d"]);
        assert!(routes.windows(2).all(|w| w[0].score() >= w[1].score()));
    }
}
