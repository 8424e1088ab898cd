//! The types most applications need to bring into scope.

pub use crate::alarm::{AlarmAck, AlarmNotification};
pub use crate::config::{DapConfig, DeviceConfig, DeviceIdentity};
pub use crate::device::{Device, Stack};
pub use crate::diag::{ChannelProperties, Maintenance, Specifier, StdDiag};
pub use crate::error::{PnioStatus, StackError, StackResult};
pub use crate::events::{ArEvent, DeviceEvents, EventResult, NullEvents};
pub use crate::ident::SubmoduleDir;
pub use crate::im::{Im0, Im1, Im2, Im3, Im4, ImRecords};
pub use crate::platform::{MioPlatform, Platform};
pub use crate::types::{Arep, IpSuite, MacAddr, SubslotKey, IOXS_BAD, IOXS_GOOD};
