// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Mailbox Lock crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A reentrant reader/writer lock per mailbox, instrumented so a stuck mailbox
// can be diagnosed from its state alone.
//
// # Architecture
//
// - [`MailboxLock`] -- explicit state machine (writer hold, reader holds,
//   FIFO waiter queue) on a `parking_lot` mutex and condition variable.
// - [`OwnerToken`] -- the logical owner a hold is recorded against. Threads
//   get one implicitly; tasks carry their own.
// - [`MailboxLockManager`] -- one lock per mailbox id, with a watchdog pass
//   that logs the dump of every lock held too long.
//
// ## Usage
//
// ```
// use mailcore_lock::{LockConfig, MailboxLockManager};
//
// let locks = MailboxLockManager::new(LockConfig::default());
// let mailbox = locks.lock_for(42);
// {
//     let _write = mailbox.write().unwrap();
//     // mutate mailbox 42
// }
// println!("{}", mailbox.describe());
// ```

pub mod config;
pub mod error;
pub mod lock;
pub mod owner;
pub mod registry;

pub use config::LockConfig;
pub use error::{LockError, LockResult};
pub use lock::{
    HolderInfo, LockKind, LockSnapshot, LockStatus, MailboxLock, ReadGuard, WaiterInfo,
    WriteGuard,
};
pub use owner::OwnerToken;
pub use registry::MailboxLockManager;
