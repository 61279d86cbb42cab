//! Minimal statsd export: render counters into the line protocol and send
//! them over UDP. Failures are reported to the caller; metrics are never
//! worth failing a build over.

use anyhow::{Context, Result};
use core_errors::CounterState;
use std::net::UdpSocket;

pub fn send(host: &str, prefix: &str, counters: &CounterState) -> Result<()> {
    let payload = counters.to_statsd_lines(prefix);
    if payload.is_empty() {
        return Ok(());
    }
    let socket = UdpSocket::bind("0.0.0.0:0").context("binding statsd socket")?;
    // Datagram per line; agents commonly cap packet sizes well below a full
    // report.
    for line in payload.lines() {
        socket
            .send_to(line.as_bytes(), host)
            .with_context(|| format!("sending to {host}"))?;
    }
    tracing::debug!(target: "runtime.statsd", host, lines = payload.lines().count(), "counters shipped");
    Ok(())
}
