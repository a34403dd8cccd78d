//! Human readable rendering of kernel trace records.

use colored::{ColoredString, Colorize};
use ktrace::records::{intr, ipc, proc, sched, timer};
use ktrace::TraceRecord;

fn name(record_type: u8) -> ColoredString {
    match record_type {
        sched::NEXT => "SCHED_NEXT".bright_white(),
        sched::IDLE => "SCHED_IDLE".white(),
        proc::CREATE => "PROC_CREATE".bright_green(),
        proc::KILL => "PROC_KILL".bright_red(),
        proc::EXIT => "PROC_EXIT".green(),
        ipc::SEND => "IPC_SEND".bright_cyan(),
        ipc::MESSAGE => "IPC_MESSAGE".cyan(),
        ipc::RECEIVE => "IPC_RECEIVE".bright_blue(),
        ipc::REPLY => "IPC_REPLY".blue(),
        intr::RAISE => "INTR_RAISE".bright_magenta(),
        intr::DELIVER => "INTR_DELIVER".magenta(),
        timer::SLEEP => "TIMER_SLEEP".bright_yellow(),
        timer::WAKE => "TIMER_WAKE".yellow(),
        _ => "UNKNOWN".dimmed(),
    }
}

fn slot(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*data.get(at)?, *data.get(at + 1)?]))
}

fn data(record: &TraceRecord) -> Option<String> {
    let d = &record.payload;
    let text = match record.record_type {
        sched::NEXT => format!("P{} -> P{}", slot(d, 0)?, slot(d, 2)?),
        sched::IDLE => String::new(),
        proc::CREATE => format!("P{} prio={}", slot(d, 0)?, d.get(2)?),
        proc::KILL | proc::EXIT | ipc::REPLY | timer::WAKE => format!("P{}", slot(d, 0)?),
        ipc::SEND | ipc::MESSAGE => format!(
            "P{} -> Port{}{}",
            slot(d, 0)?,
            slot(d, 2)?,
            if *d.get(4)? != 0 { " (handed off)" } else { "" }
        ),
        ipc::RECEIVE => format!("P{} <- P{}", slot(d, 0)?, slot(d, 2)?),
        intr::RAISE => format!("vector={:#04x}", d.first()?),
        intr::DELIVER => format!("vector={:#04x} -> P{}", d.first()?, slot(d, 1)?),
        timer::SLEEP => {
            let ticks = i32::from_le_bytes(d.get(2..6)?.try_into().ok()?);
            format!("P{} ticks={ticks}", slot(d, 0)?)
        }
        _ => return None,
    };
    Some(text)
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// One display line for `record`.
pub fn describe(record: &TraceRecord) -> String {
    let stamp = match record.timestamp {
        Some(us) => format!("[{us:010}] ").dimmed().to_string(),
        None => String::new(),
    };
    let body = data(record).unwrap_or_else(|| hex(&record.payload));
    format!(
        "{stamp}{:3} {:14} {body}",
        record.seq,
        name(record.record_type)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(record_type: u8, payload: &[u8]) -> TraceRecord {
        TraceRecord {
            seq: 7,
            record_type,
            timestamp: None,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn known_records_are_decoded() {
        colored::control::set_override(false);
        assert_eq!(
            describe(&record(ipc::SEND, &[2, 0, 5, 0, 1])),
            "  7 IPC_SEND       P2 -> Port5 (handed off)"
        );
        assert_eq!(
            describe(&record(timer::SLEEP, &[3, 0, 0xFB, 0xFF, 0xFF, 0xFF])),
            "  7 TIMER_SLEEP    P3 ticks=-5"
        );
    }

    #[test]
    fn short_payload_falls_back_to_hex() {
        colored::control::set_override(false);
        assert_eq!(
            describe(&record(sched::NEXT, &[1, 0])),
            "  7 SCHED_NEXT     0100"
        );
    }
}
