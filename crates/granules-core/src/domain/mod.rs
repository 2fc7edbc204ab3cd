//! Domain model (ids, task classes, claim state, records, errors).
//!
//! 構成:
//! - ids, record: 識別子とタスクレコード
//! - task_class, state, errors: 種別、claim 状態、ストアのエラー

pub mod errors;
pub mod ids;
pub mod record;
pub mod state;
pub mod task_class;

pub use self::errors::StoreError;
pub use self::ids::{GranuleId, IdMarker, ParseIdError, WorkerId};
pub use self::record::{TaskRecord, content_hash};
pub use self::state::{ClaimState, StateKind};
pub use self::task_class::{TaskClass, UnknownClassError};
