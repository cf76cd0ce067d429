/// One fetched record awaiting processing.
///
/// A `WorkUnit` is owned by the pipeline for the duration of its attempts and
/// is never mutated; forwarding it elsewhere (e.g. to the dead-letter sink)
/// re-wraps it with additional headers instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    partition: u32,
    offset: u64,
    key: Vec<u8>,
    value: Vec<u8>,
    headers: Vec<Header>,
}

/// A named header attached to a record. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl WorkUnit {
    pub fn new(
        partition: u32,
        offset: u64,
        key: Vec<u8>,
        value: Vec<u8>,
        headers: Vec<Header>,
    ) -> Self {
        Self {
            partition,
            offset,
            key,
            value,
            headers,
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Returns a copy of this unit with the given headers prepended, leaving
    /// the original record content untouched.
    pub fn with_prepended_headers(&self, extra: Vec<Header>) -> Self {
        let mut headers = extra;
        headers.extend(self.headers.iter().cloned());
        Self {
            partition: self.partition,
            offset: self.offset,
            key: self.key.clone(),
            value: self.value.clone(),
            headers,
        }
    }
}

/// Mutable bookkeeping for one unit's retry attempts.
///
/// Created at the first attempt, updated on each failure, and discarded once
/// the unit reaches a terminal outcome.
#[derive(Debug)]
pub struct AttemptState {
    unit: WorkUnit,
    attempt: u32,
    last_error: Option<String>,
}

impl AttemptState {
    pub fn new(unit: WorkUnit) -> Self {
        Self {
            unit,
            attempt: 0,
            last_error: None,
        }
    }

    pub fn unit(&self) -> &WorkUnit {
        &self.unit
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records a failed attempt and advances the attempt counter.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.attempt = self.attempt.saturating_add(1);
    }

    pub fn into_unit(self) -> WorkUnit {
        self.unit
    }
}
