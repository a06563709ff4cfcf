//! Broadcast command channel from the stream controller to the device workers.
//!
//! Every receiver sees every command, in order. The controller only posts the next command after
//! all workers reported on the previous one, so a receiver is never more than one message behind.
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::StreamError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WorkerCmd {
    /// Run one repetition. With `true`, prepare the first chunk of the next repetition afterwards.
    Stream(bool),
    Close,
}

pub struct CmdChan {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>, // (msg_num, worker_cmd)
    condvar: Arc<Condvar>,
}

impl CmdChan {
    pub fn new() -> Self {
        Self {
            cmd: Arc::new(Mutex::new((0, WorkerCmd::Close))),
            condvar: Arc::new(Condvar::new()),
        }
    }

    pub fn new_recvr(&self) -> CmdRecvr {
        // The first message a new receiver reacts on is the one after the last posted
        let (msg_num, _cmd_val) = *self.cmd.lock();
        CmdRecvr {
            cmd: self.cmd.clone(),
            condvar: self.condvar.clone(),
            viewed_msg_num: msg_num,
        }
    }

    pub fn send(&self, cmd: WorkerCmd) {
        let mut guard = self.cmd.lock();
        let (msg_num, cmd_val) = &mut *guard;
        *cmd_val = cmd;
        *msg_num += 1;
        self.condvar.notify_all();
    }
}

impl Default for CmdChan {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CmdRecvr {
    cmd: Arc<Mutex<(usize, WorkerCmd)>>,
    condvar: Arc<Condvar>,
    viewed_msg_num: usize,
}

impl CmdRecvr {
    /// Blocks until the next command is posted and returns it.
    ///
    /// # Errors
    /// [`StreamError::Worker`] if more than one command was posted since the previous call.
    pub fn recv(&mut self) -> Result<WorkerCmd, StreamError> {
        let mut guard = self.cmd.lock();
        while guard.0 == self.viewed_msg_num {
            self.condvar.wait(&mut guard);
        }
        let (msg_num, cmd_val) = *guard;
        if msg_num != self.viewed_msg_num + 1 {
            return Err(StreamError::Worker(format!(
                "viewed msg count {} diverged from the published command number {}",
                self.viewed_msg_num, msg_num
            )));
        }
        self.viewed_msg_num = msg_num;
        Ok(cmd_val)
    }
}
