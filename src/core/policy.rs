use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub type CacheablePredicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Decides whether a candidate value may be written.
///
/// `None` is the absent value, `Some(Value::Null)` the explicit null. Both are
/// rejected unless a custom predicate is installed, which then replaces the
/// default check entirely.
#[derive(Clone, Default)]
pub struct Cacheability {
    custom: Option<CacheablePredicate>,
}

impl Cacheability {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Self {
            custom: Some(Arc::new(predicate)),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.custom.is_some()
    }

    pub fn is_cacheable(&self, value: Option<&Value>) -> bool {
        match &self.custom {
            Some(predicate) => predicate(value),
            None => default_is_cacheable(value),
        }
    }
}

pub fn default_is_cacheable(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

/// Renders a rejected value for error messages.
pub(crate) fn describe(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl fmt::Debug for Cacheability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacheability")
            .field("custom", &self.is_custom())
            .finish()
    }
}
