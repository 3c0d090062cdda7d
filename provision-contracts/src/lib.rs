// SPDX-License-Identifier: GPL-3.0-only

pub mod error;
pub mod retry;
pub mod toolbox;
pub mod traits;

pub use error::{ErrorKind, ProvisionError, Result};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use toolbox::Toolbox;
pub use traits::{
    BootloaderOps, CommandExecutor, CommandOutput, CommandSpec, FilesystemOps, HostOps,
    ImageOps, LogicalOps, LvmDevicesConfig, PartitionOps, RootfsInstaller, StopSignal,
    UdevBlacklist,
};
