//! Ctrl-C handling.
//!
//! The first SIGINT only raises a flag; the batch driver checks it after each
//! flush so no batch is left half written. A second SIGINT while the flag is
//! set terminates the process right away with the interrupt exit code.
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub const EXIT_INTERRUPTED: u8 = 130;

pub fn install() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    if let Err(err) = register(&interrupted) {
        tracing::warn!(
            error = %err,
            "failed to install SIGINT handler; Ctrl-C will abort immediately"
        );
    }
    interrupted
}

fn register(interrupted: &Arc<AtomicBool>) -> io::Result<()> {
    // Checked before the flag is set, so only a repeated Ctrl-C exits.
    let exit_code = i32::from(EXIT_INTERRUPTED);
    flag::register_conditional_shutdown(SIGINT, exit_code, Arc::clone(interrupted))?;
    flag::register(SIGINT, Arc::clone(interrupted))?;
    Ok(())
}
