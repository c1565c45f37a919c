//! Deterministic fault injection for frame delivery
//!
//! A [`FaultPlan`] lists what should go wrong; the bus consults a
//! [`FaultInjector`] built from it for every emitted frame.
//!
//! ## Example
//!
//! ```
//! use sim_bus::fault_injection::{FaultPlan, FrameFault};
//!
//! let plan = FaultPlan::new()
//!     .with_fault(FrameFault::DropNext { count: 1 })
//!     .with_fault(FrameFault::Duplicate { frame_type: "response".to_string(), count: 2 });
//! assert_eq!(plan.faults().len(), 2);
//! ```

use serde_json::Value;
use std::collections::HashMap;

/// A fault to inject into frame delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameFault {
    /// Drop the next N frames on any topic
    DropNext { count: usize },

    /// Drop the next N frames on one topic
    DropNextOnTopic { topic: String, count: usize },

    /// Drop every frame of a type, optionally only for one action name
    DropMatching {
        frame_type: String,
        name: Option<String>,
    },

    /// Deliver the next N frames of a type twice
    Duplicate { frame_type: String, count: usize },
}

/// All faults a test wants injected
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    faults: Vec<FrameFault>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(mut self, fault: FrameFault) -> Self {
        self.faults.push(fault);
        self
    }

    pub fn faults(&self) -> &[FrameFault] {
        &self.faults
    }
}

/// Applies a fault plan, one frame at a time
#[derive(Debug, Default)]
pub struct FaultInjector {
    plan: FaultPlan,
    frames_processed: usize,
    drop_next: usize,
    drop_next_on_topic: HashMap<String, usize>,
    duplicate_next: HashMap<String, usize>,
}

impl FaultInjector {
    pub fn new(plan: FaultPlan) -> Self {
        let mut injector = Self {
            plan: plan.clone(),
            ..Self::default()
        };

        for fault in plan.faults() {
            match fault {
                FrameFault::DropNext { count } => injector.drop_next += count,
                FrameFault::DropNextOnTopic { topic, count } => {
                    *injector.drop_next_on_topic.entry(topic.clone()).or_default() += count;
                }
                FrameFault::Duplicate { frame_type, count } => {
                    *injector.duplicate_next.entry(frame_type.clone()).or_default() += count;
                }
                FrameFault::DropMatching { .. } => {
                    // Checked per frame
                }
            }
        }
        injector
    }

    /// Number of copies of `frame` to deliver: 0, 1 or 2
    pub fn copies(&mut self, topic: &str, frame: &Value) -> usize {
        self.frames_processed += 1;

        if self.drop_next > 0 {
            self.drop_next -= 1;
            return 0;
        }

        if let Some(count) = self.drop_next_on_topic.get_mut(topic) {
            if *count > 0 {
                *count -= 1;
                return 0;
            }
        }

        let frame_type = frame["type"].as_str().unwrap_or_default();
        let frame_name = frame["name"].as_str();
        for fault in self.plan.faults() {
            if let FrameFault::DropMatching {
                frame_type: wanted,
                name,
            } = fault
            {
                let name_matches = name.as_deref().map_or(true, |name| Some(name) == frame_name);
                if wanted == frame_type && name_matches {
                    return 0;
                }
            }
        }

        if let Some(count) = self.duplicate_next.get_mut(frame_type) {
            if *count > 0 {
                *count -= 1;
                return 2;
            }
        }

        1
    }

    /// Returns the number of frames seen so far
    pub fn frames_processed(&self) -> usize {
        self.frames_processed
    }
}
