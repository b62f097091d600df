// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-mailbox reader/writer lock.
//
// The lock is an explicit state machine guarded by one mutex:
//
//   writer:  owner token + reentrant hold count, or none
//   readers: hold count per owner token
//   waiters: FIFO queue of (ticket, owner, kind)
//
// A new reader is admitted while no writer holds or waits ahead of it, so a
// stream of readers cannot starve a writer. Owners re-entering a hold they
// already have are admitted at once, including a reader re-entering while a
// writer waits. A write holder may also take read holds. Upgrading a read
// hold to a write hold is refused with `UpgradeNotSupported`.
//
// `describe()` is a pure read of that state.

use std::backtrace::Backtrace;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::{LockError, LockResult};
use crate::owner::OwnerToken;

/// Which side of the lock a hold or waiter is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Read,
    Write,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Hold {
    owner: OwnerToken,
    count: u32,
    since: Instant,
    since_wall: DateTime<Utc>,
    backtrace: Option<String>,
}

impl Hold {
    fn new(owner: &OwnerToken, capture_backtrace: bool) -> Self {
        Self {
            owner: owner.clone(),
            count: 0,
            since: Instant::now(),
            since_wall: Utc::now(),
            backtrace: capture_backtrace.then(|| Backtrace::force_capture().to_string()),
        }
    }

    fn info(&self, now: Instant) -> HolderInfo {
        HolderInfo {
            owner: self.owner.to_string(),
            owner_id: self.owner.id(),
            hold_count: self.count,
            held_ms: now.duration_since(self.since).as_millis() as u64,
            since: self.since_wall,
            backtrace: self.backtrace.clone(),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    owner: OwnerToken,
    kind: LockKind,
    since: Instant,
    since_wall: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LockState {
    writer: Option<Hold>,
    readers: BTreeMap<u64, Hold>,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl LockState {
    fn writer_is(&self, owner: &OwnerToken) -> bool {
        self.writer.as_ref().is_some_and(|hold| hold.owner == *owner)
    }

    fn reads(&self, owner: &OwnerToken) -> bool {
        self.readers.contains_key(&owner.id())
    }

    /// Admission for a request that is not yet queued.
    fn admits_now(&self, owner: &OwnerToken, kind: LockKind) -> bool {
        match kind {
            LockKind::Read => match &self.writer {
                Some(hold) => hold.owner == *owner,
                None => {
                    self.reads(owner) || !self.waiters.iter().any(|w| w.kind == LockKind::Write)
                }
            },
            LockKind::Write => match &self.writer {
                Some(hold) => hold.owner == *owner,
                None => self.readers.is_empty() && self.waiters.is_empty(),
            },
        }
    }

    /// Admission for a queued request.
    fn admits_queued(&self, owner: &OwnerToken, kind: LockKind, ticket: u64) -> bool {
        if self.writer.is_some() {
            return self.writer_is(owner);
        }
        match kind {
            LockKind::Read => !self
                .waiters
                .iter()
                .take_while(|w| w.ticket != ticket)
                .any(|w| w.kind == LockKind::Write),
            LockKind::Write => {
                self.readers.is_empty() && self.waiters.front().is_some_and(|w| w.ticket == ticket)
            }
        }
    }

    fn enqueue(&mut self, owner: &OwnerToken, kind: LockKind) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(Waiter {
            ticket,
            owner: owner.clone(),
            kind,
            since: Instant::now(),
            since_wall: Utc::now(),
        });
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        self.waiters.retain(|w| w.ticket != ticket);
    }

    fn grant(&mut self, owner: &OwnerToken, kind: LockKind, capture_backtrace: bool) {
        let hold = match kind {
            LockKind::Write => self
                .writer
                .get_or_insert_with(|| Hold::new(owner, capture_backtrace)),
            LockKind::Read => self
                .readers
                .entry(owner.id())
                .or_insert_with(|| Hold::new(owner, capture_backtrace)),
        };
        hold.count += 1;
    }

    /// Drop one hold of `kind` by `owner`. False if there was none.
    fn release(&mut self, owner: &OwnerToken, kind: LockKind) -> bool {
        match kind {
            LockKind::Write => match self.writer.take() {
                Some(mut hold) if hold.owner == *owner => {
                    hold.count -= 1;
                    if hold.count > 0 {
                        self.writer = Some(hold);
                    }
                    true
                }
                other => {
                    self.writer = other;
                    false
                }
            },
            LockKind::Read => {
                let Some(hold) = self.readers.get_mut(&owner.id()) else {
                    return false;
                };
                hold.count -= 1;
                if hold.count == 0 {
                    self.readers.remove(&owner.id());
                }
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Overall state of a lock at the time of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockStatus {
    Unlocked,
    ReadLocked,
    WriteLocked,
}

/// One current hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderInfo {
    pub owner: String,
    pub owner_id: u64,
    /// Reentrant depth.
    pub hold_count: u32,
    pub held_ms: u64,
    pub since: DateTime<Utc>,
    /// Stack at first acquisition, when backtrace capture is on.
    pub backtrace: Option<String>,
}

/// One queued acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterInfo {
    pub owner: String,
    pub owner_id: u64,
    pub kind: LockKind,
    pub waiting_ms: u64,
    pub since: DateTime<Utc>,
}

/// Point-in-time dump of a mailbox lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub mailbox_id: i64,
    pub status: LockStatus,
    pub writer: Option<HolderInfo>,
    pub readers: Vec<HolderInfo>,
    /// Total read holds across all readers.
    pub reader_count: u32,
    pub waiters: Vec<WaiterInfo>,
}

impl LockSnapshot {
    /// Age of the oldest current hold.
    pub fn longest_hold(&self) -> Option<Duration> {
        self.writer
            .iter()
            .chain(self.readers.iter())
            .map(|h| h.held_ms)
            .max()
            .map(Duration::from_millis)
    }

    pub fn is_idle(&self) -> bool {
        self.status == LockStatus::Unlocked && self.waiters.is_empty()
    }
}

fn write_holder(f: &mut fmt::Formatter<'_>, holder: &HolderInfo) -> fmt::Result {
    writeln!(
        f,
        "    {} holds x{} for {} ms (since {})",
        holder.owner,
        holder.hold_count,
        holder.held_ms,
        holder.since.to_rfc3339()
    )?;
    if let Some(trace) = &holder.backtrace {
        for line in trace.lines() {
            writeln!(f, "      {}", line.trim_end())?;
        }
    }
    Ok(())
}

impl fmt::Display for LockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            LockStatus::Unlocked => "UNLOCKED",
            LockStatus::ReadLocked => "READ_LOCKED",
            LockStatus::WriteLocked => "WRITE_LOCKED",
        };
        writeln!(f, "mailbox {} lock: {status}", self.mailbox_id)?;

        match &self.writer {
            Some(writer) => {
                writeln!(f, "  write owner:")?;
                write_holder(f, writer)?;
            }
            None => writeln!(f, "  write owner: none")?,
        }

        writeln!(
            f,
            "  readers: {} holds by {} owners",
            self.reader_count,
            self.readers.len()
        )?;
        for reader in &self.readers {
            write_holder(f, reader)?;
        }

        writeln!(f, "  waiting: {}", self.waiters.len())?;
        for waiter in &self.waiters {
            writeln!(
                f,
                "    {} WAITING for {} lock for {} ms",
                waiter.owner, waiter.kind, waiter.waiting_ms
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MailboxLock
// ---------------------------------------------------------------------------

/// Reentrant reader/writer lock for one mailbox.
pub struct MailboxLock {
    mailbox_id: i64,
    config: LockConfig,
    state: Mutex<LockState>,
    changed: Condvar,
}

impl fmt::Debug for MailboxLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxLock")
            .field("mailbox_id", &self.mailbox_id)
            .field("status", &self.describe().status)
            .finish()
    }
}

impl MailboxLock {
    pub fn new(mailbox_id: i64) -> Self {
        Self::with_config(mailbox_id, LockConfig::default())
    }

    pub fn with_config(mailbox_id: i64, config: LockConfig) -> Self {
        Self {
            mailbox_id,
            config,
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn mailbox_id(&self) -> i64 {
        self.mailbox_id
    }

    /// Acquire one hold of `kind` for `owner`.
    ///
    /// With a `timeout`, returns `Ok(false)` if the hold could not be taken
    /// in time; the abandoned attempt leaves no hold and no queue entry.
    /// Without one, blocks until the hold is granted.
    pub fn acquire_as(
        &self,
        owner: &OwnerToken,
        kind: LockKind,
        timeout: Option<Duration>,
    ) -> LockResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        if kind == LockKind::Write && !state.writer_is(owner) && state.reads(owner) {
            return Err(LockError::UpgradeNotSupported {
                mailbox_id: self.mailbox_id,
            });
        }

        if state.admits_now(owner, kind) {
            state.grant(owner, kind, self.config.capture_backtraces);
            return Ok(true);
        }

        let ticket = state.enqueue(owner, kind);
        debug!(
            mailbox_id = self.mailbox_id,
            owner = %owner,
            kind = %kind,
            queued = state.waiters.len(),
            "Mailbox lock contended"
        );

        loop {
            if state.admits_queued(owner, kind, ticket) {
                state.dequeue(ticket);
                state.grant(owner, kind, self.config.capture_backtraces);
                // Readers queued behind this one may now be admitted too.
                self.changed.notify_all();
                return Ok(true);
            }
            match deadline {
                None => self.changed.wait(&mut state),
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out()
                        && !state.admits_queued(owner, kind, ticket)
                    {
                        state.dequeue(ticket);
                        self.changed.notify_all();
                        debug!(
                            mailbox_id = self.mailbox_id,
                            owner = %owner,
                            kind = %kind,
                            "Gave up waiting for mailbox lock"
                        );
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Release one hold of `kind` taken by `owner`.
    pub fn release_as(&self, owner: &OwnerToken, kind: LockKind) -> LockResult<()> {
        let mut state = self.state.lock();
        if !state.release(owner, kind) {
            return Err(LockError::NotHeld {
                mailbox_id: self.mailbox_id,
                kind,
            });
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Block until the calling thread holds a read lock.
    pub fn acquire_read(&self) {
        self.acquire_read_untimed(&OwnerToken::current());
    }

    /// A read request without a timeout is always granted.
    fn acquire_read_untimed(&self, owner: &OwnerToken) {
        let granted = self.acquire_as(owner, LockKind::Read, None);
        debug_assert!(
            matches!(granted, Ok(true)),
            "untimed read on mailbox {} returned {granted:?}",
            self.mailbox_id
        );
    }

    /// Block until the calling thread holds the write lock.
    pub fn acquire_write(&self) -> LockResult<()> {
        self.acquire_as(&OwnerToken::current(), LockKind::Write, None)
            .map(|_| ())
    }

    /// Try for a read lock for at most `timeout`.
    pub fn try_acquire_read_for(&self, timeout: Duration) -> bool {
        matches!(
            self.acquire_as(&OwnerToken::current(), LockKind::Read, Some(timeout)),
            Ok(true)
        )
    }

    /// Try for the write lock for at most `timeout`.
    pub fn try_acquire_write_for(&self, timeout: Duration) -> LockResult<bool> {
        self.acquire_as(&OwnerToken::current(), LockKind::Write, Some(timeout))
    }

    pub fn release_read(&self) -> LockResult<()> {
        self.release_as(&OwnerToken::current(), LockKind::Read)
    }

    pub fn release_write(&self) -> LockResult<()> {
        self.release_as(&OwnerToken::current(), LockKind::Write)
    }

    /// Read lock for the calling thread, released when the guard drops.
    pub fn read(&self) -> ReadGuard<'_> {
        self.acquire_read();
        ReadGuard {
            lock: self,
            owner: OwnerToken::current(),
        }
    }

    /// Write lock for the calling thread, released when the guard drops.
    pub fn write(&self) -> LockResult<WriteGuard<'_>> {
        self.write_as(OwnerToken::current())
    }

    /// Read lock held by `owner`, released when the guard drops.
    pub fn read_as(&self, owner: OwnerToken) -> ReadGuard<'_> {
        self.acquire_read_untimed(&owner);
        ReadGuard { lock: self, owner }
    }

    /// Write lock held by `owner`, released when the guard drops.
    pub fn write_as(&self, owner: OwnerToken) -> LockResult<WriteGuard<'_>> {
        self.acquire_as(&owner, LockKind::Write, None)?;
        Ok(WriteGuard { lock: self, owner })
    }

    /// Reentrant depth of `owner`'s write hold, 0 if it has none.
    pub fn write_hold_count(&self, owner: &OwnerToken) -> u32 {
        let state = self.state.lock();
        state
            .writer
            .as_ref()
            .filter(|hold| hold.owner == *owner)
            .map_or(0, |hold| hold.count)
    }

    /// Reentrant depth of `owner`'s read hold, 0 if it has none.
    pub fn read_hold_count(&self, owner: &OwnerToken) -> u32 {
        self.state
            .lock()
            .readers
            .get(&owner.id())
            .map_or(0, |hold| hold.count)
    }

    /// Snapshot of the owner, readers and waiters.
    pub fn describe(&self) -> LockSnapshot {
        let state = self.state.lock();
        let now = Instant::now();
        let status = if state.writer.is_some() {
            LockStatus::WriteLocked
        } else if !state.readers.is_empty() {
            LockStatus::ReadLocked
        } else {
            LockStatus::Unlocked
        };
        LockSnapshot {
            mailbox_id: self.mailbox_id,
            status,
            writer: state.writer.as_ref().map(|hold| hold.info(now)),
            readers: state.readers.values().map(|hold| hold.info(now)).collect(),
            reader_count: state.readers.values().map(|hold| hold.count).sum(),
            waiters: state
                .waiters
                .iter()
                .map(|w| WaiterInfo {
                    owner: w.owner.to_string(),
                    owner_id: w.owner.id(),
                    kind: w.kind,
                    waiting_ms: now.duration_since(w.since).as_millis() as u64,
                    since: w.since_wall,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// A read hold released on drop.
#[must_use = "the read lock is released when the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a MailboxLock,
    owner: OwnerToken,
}

/// A write hold released on drop.
#[must_use = "the write lock is released when the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a MailboxLock,
    owner: OwnerToken,
}

impl ReadGuard<'_> {
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }
}

impl WriteGuard<'_> {
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release_as(&self.owner, LockKind::Read) {
            warn!(error = %e, "Read guard released a hold it did not own");
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release_as(&self.owner, LockKind::Write) {
            warn!(error = %e, "Write guard released a hold it did not own");
        }
    }
}
