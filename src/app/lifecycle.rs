use crossbeam::channel::Sender;

use crate::{Error, Result};

use super::LoopSignal;

/// Install a ctrl-c/SIGTERM handler that asks the monitor loop to stop at its next wait.
pub(super) fn install_quit_handler(signals: Sender<LoopSignal>) -> Result<()> {
    ctrlc::set_handler(move || {
        let _ = signals.send(LoopSignal::Quit);
    })
    .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))
}
