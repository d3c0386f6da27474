// Copyright 2025 Gridgate Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use gridgate_common::{age_millis, now_millis, InstanceDescriptor, InstanceId, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat snapshot published by one instance.
///
/// Written only by the owning instance, read by every peer. Records are never
/// deleted; a dead instance is recognised by the age of its last update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatisticsRecord {
    pub instance_id: InstanceId,
    pub role: Role,
    pub process_id: u32,
    /// Milliseconds since the Unix epoch
    pub last_updated: u64,
    pub is_manager: bool,
}

impl StatisticsRecord {
    /// Fresh record for `descriptor`, stamped with the current time
    pub fn new(descriptor: &InstanceDescriptor, is_manager: bool) -> Self {
        Self {
            instance_id: descriptor.id,
            role: descriptor.role,
            process_id: descriptor.process_id,
            last_updated: now_millis(),
            is_manager,
        }
    }

    pub fn age(&self, now_ms: u64) -> Duration {
        age_millis(self.last_updated, now_ms)
    }
}
