use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Core trait for all queue messages exchanged between engine and workers.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + Clone {
    fn message_type() -> &'static str
    where
        Self: Sized;

    fn message_id(&self) -> &str;
}
