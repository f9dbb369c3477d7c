// Subject layout shared by the consumer slots and the traffic generator.
use rand::Rng;

/// Subjects are `<prefix>.<group>.<key>`; slots filter on whole groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSpace {
    prefix: String,
    groups: usize,
    keys_per_group: usize,
}

impl SubjectSpace {
    pub fn new(prefix: impl Into<String>, groups: usize, keys_per_group: usize) -> Self {
        Self {
            prefix: prefix.into(),
            groups: groups.max(1),
            keys_per_group: keys_per_group.max(1),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Filter covering every subject in the space; used as the stream subject.
    pub fn stream_filter(&self) -> String {
        format!("{}.>", self.prefix)
    }

    /// Filter for a consumer slot. Slots wrap around the groups, so several
    /// slots share subjects once concurrency exceeds the group count.
    pub fn slot_filter(&self, slot_id: usize) -> String {
        format!("{}.{}.>", self.prefix, slot_id % self.groups)
    }

    pub fn subject(&self, group: usize, key: usize) -> String {
        format!(
            "{}.{}.{}",
            self.prefix,
            group % self.groups,
            key % self.keys_per_group
        )
    }

    pub fn random_subject<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let group = rng.gen_range(0..self.groups);
        let key = rng.gen_range(0..self.keys_per_group);
        self.subject(group, key)
    }
}

/// NATS-style subject matching: `*` matches one token, a trailing `>` matches
/// one or more remaining tokens.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return filter_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
