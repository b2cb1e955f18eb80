use serde::{Deserialize, Serialize};

macro_rules! define_id_type {
    ($name:ident) => {
        /// An opaque identifier. Comparisons are exact string equality.
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id_type!(FrameworkId);
define_id_type!(OfferId);
define_id_type!(SlaveId);
define_id_type!(TaskId);
define_id_type!(ExecutorId);

/// Mints identifiers of the form `<prefix>-<seq>`. The prefix identifies
/// the master session so that ids from different master incarnations never
/// collide.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    pub fn next<T: From<String>>(&mut self) -> T {
        let value = format!("{}-{:04}", self.prefix, self.next);
        self.next += 1;
        T::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_distinct_and_prefixed() {
        let mut generator = IdGenerator::new("2026");
        let a: FrameworkId = generator.next();
        let b: FrameworkId = generator.next();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("2026-"));
        assert_eq!(a.to_string(), a.as_str());
    }
}
