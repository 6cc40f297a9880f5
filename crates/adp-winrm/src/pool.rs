//! Session pool.
//!
//! Two FIFO queues (command sessions, file sessions) behind one mutex. A
//! lease owns its session exclusively and hands it back on drop, so every
//! exit path returns the session. The lock is only held to push or pop;
//! new sessions are opened outside of it.

use crate::session::{CommandSession, FileSession, ShellFactory};
use adp_core::AdResult;
use log::debug;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Queues {
    command: VecDeque<CommandSession>,
    file: VecDeque<FileSession>,
}

pub struct SessionPool {
    factory: Arc<dyn ShellFactory>,
    queues: Mutex<Queues>,
    next_id: AtomicU64,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn ShellFactory>) -> Self {
        Self {
            factory,
            queues: Mutex::new(Queues::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        // Queues hold no invariant a panicking holder could break.
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Pop an idle command session or open a new one.
    pub async fn acquire_command(&self) -> AdResult<CommandLease<'_>> {
        let idle = self.lock().command.pop_front();
        let session = match idle {
            Some(s) => s,
            None => {
                let id = self.next_id();
                debug!("Opening command session {}", id);
                CommandSession::new(id, self.factory.open().await?)
            }
        };
        Ok(CommandLease {
            pool: self,
            session: Some(session),
        })
    }

    /// Pop an idle file session or open a new one.
    pub async fn acquire_file(&self) -> AdResult<FileLease<'_>> {
        let idle = self.lock().file.pop_front();
        let session = match idle {
            Some(s) => s,
            None => {
                let id = self.next_id();
                debug!("Opening file session {}", id);
                FileSession::new(id, self.factory.open().await?)
            }
        };
        Ok(FileLease {
            pool: self,
            session: Some(session),
        })
    }

    fn release_command(&self, session: CommandSession) {
        self.lock().command.push_back(session);
    }

    fn release_file(&self, session: FileSession) {
        self.lock().file.push_back(session);
    }

    /// Idle (command, file) session counts.
    pub fn idle(&self) -> (usize, usize) {
        let q = self.lock();
        (q.command.len(), q.file.len())
    }
}

/// Exclusive use of a command session until dropped.
pub struct CommandLease<'a> {
    pool: &'a SessionPool,
    session: Option<CommandSession>,
}

impl Deref for CommandLease<'_> {
    type Target = CommandSession;

    fn deref(&self) -> &CommandSession {
        self.session.as_ref().expect("lease holds its session until drop")
    }
}

impl DerefMut for CommandLease<'_> {
    fn deref_mut(&mut self) -> &mut CommandSession {
        self.session.as_mut().expect("lease holds its session until drop")
    }
}

impl Drop for CommandLease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release_command(session);
        }
    }
}

/// Exclusive use of a file session until dropped.
pub struct FileLease<'a> {
    pool: &'a SessionPool,
    session: Option<FileSession>,
}

impl Deref for FileLease<'_> {
    type Target = FileSession;

    fn deref(&self) -> &FileSession {
        self.session.as_ref().expect("lease holds its session until drop")
    }
}

impl DerefMut for FileLease<'_> {
    fn deref_mut(&mut self) -> &mut FileSession {
        self.session.as_mut().expect("lease holds its session until drop")
    }
}

impl Drop for FileLease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release_file(session);
        }
    }
}
