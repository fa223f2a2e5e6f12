use bon::Builder;
use serde::Serialize;
use serde_with::serde_as;

/// One firmware image slot as reported by the device.
#[serde_as]
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Builder)]
pub struct Image {
    #[builder(default)]
    slot: u64,
    #[builder(into, default)]
    version: String,
    #[builder(default)]
    confirmed: bool,
    #[builder(default)]
    pending: bool,
    #[builder(default)]
    active: bool,
    #[builder(default)]
    bootable: bool,
    #[serde_as(as = "serde_with::hex::Hex")]
    #[builder(into, default)]
    hash: Vec<u8>,
}

impl Image {
    #[must_use]
    pub fn slot(&self) -> u64 {
        self.slot
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn is_bootable(&self) -> bool {
        self.bootable
    }

    /// Content hash used to address the image in test/confirm commands.
    #[must_use]
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// Returns the content hash as lowercase hex.
    ///
    /// ```
    /// use newtmgr::Image;
    ///
    /// let image = Image::builder().hash(vec![0xAB, 0x01]).build();
    /// assert_eq!("ab01", image.hash_hex());
    /// ```
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// Scheduler statistics for one task.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Builder)]
pub struct TaskStats {
    #[builder(default)]
    task_id: u64,
    #[builder(into, default)]
    name: String,
    #[builder(default)]
    priority: u64,
    #[builder(default)]
    state: u64,
    #[builder(default)]
    run_time: u64,
    #[builder(default)]
    context_switch_count: u64,
    #[builder(default)]
    stack_size: u64,
    #[builder(default)]
    stack_used: u64,
    #[builder(default)]
    last_sanity_checkin: u64,
    #[builder(default)]
    next_sanity_checkin: u64,
}

impl TaskStats {
    #[must_use]
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn priority(&self) -> u64 {
        self.priority
    }

    #[must_use]
    pub fn state(&self) -> u64 {
        self.state
    }

    #[must_use]
    pub fn run_time(&self) -> u64 {
        self.run_time
    }

    #[must_use]
    pub fn context_switch_count(&self) -> u64 {
        self.context_switch_count
    }

    /// Stack size in words.
    #[must_use]
    pub fn stack_size(&self) -> u64 {
        self.stack_size
    }

    #[must_use]
    pub fn stack_used(&self) -> u64 {
        self.stack_used
    }

    #[must_use]
    pub fn last_sanity_checkin(&self) -> u64 {
        self.last_sanity_checkin
    }

    #[must_use]
    pub fn next_sanity_checkin(&self) -> u64 {
        self.next_sanity_checkin
    }
}

/// One named counter inside a stat group.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, derive_more::From)]
pub struct StatDetails {
    name: String,
    value: u64,
}

impl StatDetails {
    #[must_use]
    pub fn new(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.value
    }
}
