pub mod constants;
pub mod permission;

pub use constants::*;
pub use permission::{
    PermissionFilter, PermissionReport, PermissionSkipFunc, PermissionVerifyFunc,
};
