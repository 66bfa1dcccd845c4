pub use std::path::{Path, PathBuf};

pub use anyhow::{Context, Result};
pub use log::{debug, error, info, trace, warn};
pub use once_cell::sync::Lazy;
pub use serde::{Deserialize, Serialize};

pub use crate::error::CacheError;
