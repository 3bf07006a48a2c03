//! Helpers for asserting the exact bytes a driver exchanges with a device.
//!
//! ```
//! # tokio_test::block_on(async {
//! use instrumentkit::testing::expected_protocol;
//!
//! let (mut inst, check) = expected_protocol(&["*IDN?"], &["ACME,1,2,3"], "\n");
//! assert_eq!(inst.query("*IDN?").await.unwrap(), "ACME,1,2,3");
//! check.assert_done();
//! # });
//! ```

use crate::comm::LoopbackCommunicator;
use crate::Instrument;
use std::sync::{Arc, Mutex};

/// Handle for checking what the host wrote during a scripted exchange.
pub struct ProtocolCheck {
    expected: String,
    output: Arc<Mutex<Vec<u8>>>,
}

impl ProtocolCheck {
    /// Everything written so far, lossily decoded.
    pub fn written(&self) -> String {
        let out = self.output.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Panics unless the host wrote exactly the expected commands.
    #[allow(clippy::panic)]
    pub fn assert_done(&self) {
        let written = self.written();
        if written != self.expected {
            panic!(
                "protocol mismatch\n  expected: {:?}\n  written:  {:?}",
                self.expected, written
            );
        }
    }
}

fn join_lines(lines: &[&str], sep: &str) -> String {
    lines.iter().map(|l| format!("{l}{sep}")).collect()
}

/// Builds an instrument over a loopback that replays `ins_to_host` (each
/// line followed by `sep`) and records what the host writes. The returned
/// check compares the recording with `host_to_ins`, each followed by `sep`.
///
/// The loopback's terminator is set to `sep`; drivers opened on the
/// instrument may change it.
pub fn expected_protocol(
    host_to_ins: &[&str],
    ins_to_host: &[&str],
    sep: &str,
) -> (Instrument, ProtocolCheck) {
    let replies: Vec<&[u8]> = ins_to_host.iter().map(|l| l.as_bytes()).collect();
    expected_protocol_raw(host_to_ins, &replies, sep)
}

/// Like [`expected_protocol`], for devices that reply with binary data.
pub fn expected_protocol_raw(
    host_to_ins: &[&str],
    ins_to_host: &[&[u8]],
    sep: &str,
) -> (Instrument, ProtocolCheck) {
    let mut input = Vec::new();
    for reply in ins_to_host {
        input.extend_from_slice(reply);
        input.extend_from_slice(sep.as_bytes());
    }
    let comm = LoopbackCommunicator::new(input).with_terminator(sep);
    let output = comm.output();
    let check = ProtocolCheck {
        expected: join_lines(host_to_ins, sep),
        output,
    };
    (Instrument::new(Box::new(comm)), check)
}
