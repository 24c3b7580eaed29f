//! Extended attributes: the remote contract has no concept of them, so
//! every operation here fakes the minimal behavior that keeps desktop
//! clients (Finder, GNOME, editors probing for ACLs) from surfacing
//! spurious errors.

use super::DispatchState;
use fuser::{ReplyEmpty, ReplyXattr, Request};
use std::ffi::OsStr;

pub fn getxattr(_state: &DispatchState, _req: &Request, _ino: u64, _name: &OsStr, _size: u32, reply: ReplyXattr) {
    #[cfg(target_os = "macos")]
    reply.error(libc::ENOATTR);

    #[cfg(not(target_os = "macos"))]
    reply.error(libc::ENODATA);
}

pub fn setxattr(_state: &DispatchState, _req: &Request, _ino: u64, _name: &OsStr, _value: &[u8], _flags: i32, _position: u32, reply: ReplyEmpty) {
    reply.ok();
}

pub fn listxattr(_state: &DispatchState, _req: &Request, _ino: u64, size: u32, reply: ReplyXattr) {
    if size == 0 {
        reply.size(0);
    } else {
        reply.data(&[]);
    }
}

pub fn removexattr(_state: &DispatchState, _req: &Request, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
    reply.ok();
}
