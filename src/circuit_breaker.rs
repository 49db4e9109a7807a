use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::collections::HashMap;
use std::time::Duration;

/// Circuit breaker guarding one data source.
pub type SourceCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for one source adapter.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures (errors or timeouts) open the circuit.
/// - **Backoff**: Exponential backoff from 10s to 60s before a trial call is let through.
///
/// While open, calls to the source are rejected immediately and reported as a
/// per-source failure, so a dead provider does not cost the full timeout on
/// every search.
pub fn create_source_circuit_breaker() -> SourceCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// One breaker per source id.
#[derive(Default)]
pub struct SourceBreakers {
    breakers: HashMap<String, SourceCircuitBreaker>,
}

impl SourceBreakers {
    pub fn for_sources<'a>(sources: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            breakers: sources
                .into_iter()
                .map(|source| (source.to_string(), create_source_circuit_breaker()))
                .collect(),
        }
    }

    pub fn get(&self, source: &str) -> Option<&SourceCircuitBreaker> {
        self.breakers.get(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_source_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("provider down"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_breakers_are_independent_per_source() {
        let breakers = SourceBreakers::for_sources(["google_maps", "hunter"]);

        let hunter = breakers.get("hunter").unwrap();
        for _ in 0..5 {
            let _: Result<(), Error<&str>> = hunter.call(|| Err::<(), &str>("quota exceeded"));
        }
        assert!(!hunter.is_call_permitted());

        let maps = breakers.get("google_maps").unwrap();
        let result: Result<i32, Error<&str>> = maps.call(|| Ok::<i32, &str>(42));
        assert_eq!(result.unwrap(), 42);

        assert!(breakers.get("nominatim").is_none());
    }
}
