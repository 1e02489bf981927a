//! lessonkit-storage: asset storage seam, OpenDAL implementation, object paths

pub mod asset;
pub mod error;
pub mod health;
pub mod operator;
pub mod path;

pub use asset::{AssetStorage, AssetWriter, OpenDalAssetStorage};
pub use error::StorageError;
pub use health::check_health;
pub use operator::{build_operator, S3Credentials};
pub use path::{asset_path, sanitize_file_name};
