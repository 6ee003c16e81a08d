//! Subdomain allocation
//!
//! Names are `<adjective>-<noun>` pairs drawn from two fixed word lists. The
//! allocator never reserves anything itself: callers pass an `is_taken`
//! predicate and insert the returned name under their own lock.

use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

const ADJECTIVES: [&str; 12] = [
    "brave", "calm", "clever", "crisp", "bright", "mellow", "quick", "witty", "sly", "kind",
    "swift", "bold",
];

const NOUNS: [&str; 12] = [
    "pickle", "tiger", "otter", "panda", "comet", "ember", "falcon", "grove", "harbor", "meadow",
    "rocket", "willow",
];

/// Generated names tried against `is_taken` before falling back to a numeric suffix
const MAX_GENERATED_ATTEMPTS: usize = 10;

/// Upper bound (exclusive) of the fallback numeric suffix
const FALLBACK_SUFFIX_RANGE: f64 = 1000.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubdomainError {
    #[error("Subdomain \"{0}\" is already in use")]
    Conflict(String),

    #[error("Invalid subdomain: {0}")]
    Invalid(String),
}

/// Source of uniform values in `[0, 1)`
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// Default source backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

#[derive(Clone)]
pub struct SubdomainAllocator {
    random: Arc<dyn RandomSource>,
}

impl SubdomainAllocator {
    pub fn new() -> Self {
        Self::with_random_source(Arc::new(ThreadRngSource))
    }

    pub fn with_random_source(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Pick a subdomain.
    ///
    /// A requested name is returned verbatim when free and rejected with
    /// [`SubdomainError::Conflict`] when taken. Without a request, up to ten
    /// generated names are checked; after that a generated name with a
    /// `-<0..1000>` suffix is returned unchecked.
    pub fn allocate<F>(&self, requested: Option<&str>, is_taken: F) -> Result<String, SubdomainError>
    where
        F: Fn(&str) -> bool,
    {
        if let Some(requested) = requested {
            if is_taken(requested) {
                return Err(SubdomainError::Conflict(requested.to_string()));
            }
            return Ok(requested.to_string());
        }

        for _ in 0..MAX_GENERATED_ATTEMPTS {
            let candidate = self.generate();
            if !is_taken(&candidate) {
                return Ok(candidate);
            }
        }

        let base = self.generate();
        let suffix = self.index(FALLBACK_SUFFIX_RANGE as usize);
        Ok(format!("{}-{}", base, suffix))
    }

    /// Generate an `<adjective>-<noun>` name
    pub fn generate(&self) -> String {
        let adjective = ADJECTIVES[self.index(ADJECTIVES.len())];
        let noun = NOUNS[self.index(NOUNS.len())];
        format!("{}-{}", adjective, noun)
    }

    fn index(&self, len: usize) -> usize {
        let r = self.random.next_f64();
        // Clamp guards sources that return exactly 1.0
        ((r * len as f64).floor() as usize).min(len - 1)
    }
}

impl Default for SubdomainAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a user-provided subdomain as a DNS label
///
/// Checks:
/// - Between 3-63 characters
/// - ASCII alphanumeric and hyphens only
/// - Doesn't start or end with hyphen
pub fn validate_subdomain(subdomain: &str) -> Result<(), SubdomainError> {
    if subdomain.len() > 63 {
        return Err(SubdomainError::Invalid(format!(
            "too long (max 63 characters): {}",
            subdomain.len()
        )));
    }

    if subdomain.len() < 3 {
        return Err(SubdomainError::Invalid(
            "too short (minimum 3 characters)".to_string(),
        ));
    }

    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(SubdomainError::Invalid(
            "cannot start or end with hyphen".to_string(),
        ));
    }

    if let Some(ch) = subdomain
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && *ch != '-')
    {
        return Err(SubdomainError::Invalid(format!(
            "contains invalid character '{}' (only alphanumeric and hyphens allowed)",
            ch
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Replays a fixed sequence of draws, repeating the last one
    struct SequenceSource {
        values: Mutex<Vec<f64>>,
    }

    impl SequenceSource {
        fn new(mut values: Vec<f64>) -> Arc<Self> {
            values.reverse();
            Arc::new(Self {
                values: Mutex::new(values),
            })
        }
    }

    impl RandomSource for SequenceSource {
        fn next_f64(&self) -> f64 {
            let mut values = self.values.lock().unwrap();
            if values.len() > 1 {
                values.pop().unwrap()
            } else {
                values[0]
            }
        }
    }

    #[test]
    fn test_zero_source_generates_first_words() {
        let allocator = SubdomainAllocator::with_random_source(SequenceSource::new(vec![0.0]));
        assert_eq!(allocator.generate(), "brave-pickle");
    }

    #[test]
    fn test_upper_bound_draws_stay_in_range() {
        let allocator =
            SubdomainAllocator::with_random_source(SequenceSource::new(vec![0.9999, 1.0]));
        assert_eq!(allocator.generate(), "bold-willow");
    }

    #[test]
    fn test_requested_subdomain_free() {
        let allocator = SubdomainAllocator::new();
        let name = allocator.allocate(Some("myapp"), |_| false).unwrap();
        assert_eq!(name, "myapp");
    }

    #[test]
    fn test_requested_subdomain_taken() {
        let allocator = SubdomainAllocator::new();
        let err = allocator.allocate(Some("myapp"), |s| s == "myapp").unwrap_err();
        assert_eq!(err, SubdomainError::Conflict("myapp".to_string()));
        assert_eq!(err.to_string(), "Subdomain \"myapp\" is already in use");
    }

    #[test]
    fn test_distinct_draws_give_distinct_names() {
        // adjective draw, noun draw, adjective draw, noun draw
        let allocator = SubdomainAllocator::with_random_source(SequenceSource::new(vec![
            0.0, 0.0, 0.5, 0.5, 0.5,
        ]));
        let first = allocator.allocate(None, |_| false).unwrap();
        let second = allocator.allocate(None, |_| false).unwrap();

        assert_eq!(first, "brave-pickle");
        assert_eq!(second, "quick-falcon");
        assert_ne!(first, second);
    }

    #[test]
    fn test_skips_taken_generated_names() {
        let allocator = SubdomainAllocator::with_random_source(SequenceSource::new(vec![
            0.0, 0.0, 0.1, 0.1,
        ]));
        let name = allocator
            .allocate(None, |s| s == "brave-pickle")
            .unwrap();
        assert_eq!(name, "calm-tiger");
    }

    #[test]
    fn test_fallback_suffix_after_ten_attempts() {
        let allocator = SubdomainAllocator::with_random_source(SequenceSource::new(vec![0.0]));
        let name = allocator.allocate(None, |_| true).unwrap();
        assert_eq!(name, "brave-pickle-0");
    }

    #[test]
    fn test_random_names_use_word_lists() {
        let allocator = SubdomainAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let name = allocator.generate();
            let (adjective, noun) = name.split_once('-').unwrap();
            assert!(ADJECTIVES.contains(&adjective), "{}", name);
            assert!(NOUNS.contains(&noun), "{}", name);
            seen.insert(name);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_validate_subdomain() {
        assert!(validate_subdomain("myapp").is_ok());
        assert!(validate_subdomain("my-app-2").is_ok());
        assert!(validate_subdomain("ab").is_err());
        assert!(validate_subdomain(&"a".repeat(64)).is_err());
        assert!(validate_subdomain("-app").is_err());
        assert!(validate_subdomain("app-").is_err());
        assert!(validate_subdomain("my_app").is_err());
        assert!(validate_subdomain("my.app").is_err());
        assert!(validate_subdomain("ünï").is_err());
    }
}
