//! Receive filter
//!
//! An ordered list of pass/drop rules. The first enabled rule whose bus and
//! identifier range match decides; a frame no rule matches is passed.

use std::fmt;
use std::sync::Arc;

use canscope_core::frame::{MAX_EXTENDED_ID, MAX_STANDARD_ID};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// What a matching rule does with the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterAction {
    #[default]
    Pass,
    Drop,
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterAction::Pass => f.write_str("Pass"),
            FilterAction::Drop => f.write_str("Drop"),
        }
    }
}

/// One filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub action: FilterAction,
    /// Inclusive identifier range start
    #[serde(default)]
    pub id_from: u32,
    /// Inclusive identifier range end
    #[serde(default = "default_id_to")]
    pub id_to: u32,
    /// Bus number, 0 = any bus
    #[serde(default)]
    pub bus: u8,
    #[serde(default)]
    pub name: String,
}

fn default_enabled() -> bool {
    true
}

fn default_id_to() -> u32 {
    MAX_STANDARD_ID
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            enabled: true,
            action: FilterAction::Pass,
            id_from: 0,
            id_to: MAX_STANDARD_ID,
            bus: 0,
            name: String::new(),
        }
    }
}

impl FilterRule {
    pub fn new(name: impl Into<String>, action: FilterAction, id_from: u32, id_to: u32) -> Self {
        Self {
            action,
            id_from,
            id_to,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn on_bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Bus and range match (ignores `enabled`)
    pub fn matches(&self, id: u32, bus: u8) -> bool {
        if self.bus != 0 && self.bus != bus {
            return false;
        }
        self.id_from <= id && id <= self.id_to
    }
}

/// Ordered first-match filter
#[derive(Debug, Clone, PartialEq)]
pub struct RxFilter {
    rules: Vec<FilterRule>,
}

/// Filter shared between the configuring side and the consumers
pub type SharedFilter = Arc<RwLock<RxFilter>>;

impl Default for RxFilter {
    fn default() -> Self {
        Self {
            rules: Self::default_rules(),
        }
    }
}

impl RxFilter {
    /// Filter with no rules: everything passes
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn default_rules() -> Vec<FilterRule> {
        vec![
            FilterRule::new("Standard", FilterAction::Pass, 0, MAX_STANDARD_ID),
            FilterRule::new(
                "Extended",
                FilterAction::Pass,
                MAX_STANDARD_ID + 1,
                MAX_EXTENDED_ID,
            ),
        ]
    }

    pub fn shared(self) -> SharedFilter {
        Arc::new(RwLock::new(self))
    }

    pub fn accepts(&self, id: u32, bus: u8) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches(id, bus))
            .map(|rule| rule.action == FilterAction::Pass)
            .unwrap_or(true)
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Append a standard-range rule with the given action; returns its index
    pub fn add_rule(&mut self, action: FilterAction) -> usize {
        self.rules.push(FilterRule {
            action,
            ..Default::default()
        });
        self.rules.len() - 1
    }

    /// Insert a rule at `index` (clamped to the end)
    pub fn insert_rule(&mut self, index: usize, rule: FilterRule) -> usize {
        let index = index.min(self.rules.len());
        self.rules.insert(index, rule);
        index
    }

    pub fn remove_rule(&mut self, index: usize) -> Option<FilterRule> {
        (index < self.rules.len()).then(|| self.rules.remove(index))
    }

    /// Mutable access to one rule
    pub fn rule_mut(&mut self, index: usize) -> Option<&mut FilterRule> {
        self.rules.get_mut(index)
    }

    /// Swap a rule with its predecessor; returns whether it moved
    pub fn move_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.rules.len() {
            return false;
        }
        self.rules.swap(index - 1, index);
        true
    }

    /// Swap a rule with its successor; returns whether it moved
    pub fn move_down(&mut self, index: usize) -> bool {
        let Some(next) = index.checked_add(1).filter(|&next| next < self.rules.len()) else {
            return false;
        };
        self.rules.swap(index, next);
        true
    }

    /// Replace all rules; an empty list restores the default rules
    pub fn set_rules(&mut self, rules: Vec<FilterRule>) {
        self.rules = if rules.is_empty() {
            Self::default_rules()
        } else {
            rules
        };
    }

    pub fn reset_defaults(&mut self) {
        self.rules = Self::default_rules();
    }
}
