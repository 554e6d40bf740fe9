//! Fleet members and the local instance state machine.
//!
//! Layout of a local instance directory:
//! - `aem-quickstart.jar`, `license.properties` - staged inputs
//! - `crx-quickstart/` - unpacked runtime (bin, conf/cq.pid, logs, install)
//! - `control/{start,stop,status}.{sh,bat}` - operator-overridable wrappers
//! - `create.lock`, `init.lock` - phase markers

mod customize;
mod fleet;
mod lifecycle;
mod local;
mod lock;
mod patch;
mod provision;
mod status;
mod types;

pub use customize::{expand_template, DEFAULT_FILES};
pub use fleet::{build_fleet, filter_instances, local_instances, names};
pub use lifecycle::LocalInstanceManager;
pub use local::LocalInstance;
pub use lock::LockState;
pub use patch::{Platform, PATCH_TABLE};
pub use provision::StagedQuickstart;
pub use status::LocalStatus;
pub use types::{
    Credentials, DeployProgress, Instance, InstanceKind, InstanceType, InstanceUrl,
    LocalSettings, PASSWORD_DEFAULT, USER_DEFAULT,
};

#[cfg(all(test, unix))]
pub(crate) use lifecycle::tests as lifecycle_tests;
