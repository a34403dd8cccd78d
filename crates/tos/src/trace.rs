use ktrace::TraceHook;

/// Optional binary trace sink. Failures are logged and otherwise ignored.
#[derive(Clone, Default)]
pub(crate) struct Trace {
    hook: Option<TraceHook>,
}

impl Trace {
    pub fn new(hook: Option<TraceHook>) -> Self {
        Self { hook }
    }

    pub fn emit(&self, record: u8, payload: &[u8]) {
        if let Some(hook) = &self.hook {
            if let Err(err) = hook(record, payload, true) {
                log::trace!("trace record {record} dropped: {err}");
            }
        }
    }
}

pub(crate) fn slot_bytes(slot: usize) -> [u8; 2] {
    (slot as u16).to_le_bytes()
}

/// Concatenates two slot numbers.
pub(crate) fn slot_pair(a: usize, b: usize) -> [u8; 4] {
    let [a0, a1] = slot_bytes(a);
    let [b0, b1] = slot_bytes(b);
    [a0, a1, b0, b1]
}
