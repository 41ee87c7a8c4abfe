//! A cursor into the test matrix: `(tft_idx, test_cases_idx, connections_idx)`.

use std::sync::Arc;

use thiserror::Error;

use super::model::{ClientNode, Connection, ServerNode, TestGroup};
use super::TestConfig;
use crate::types::TestCaseType;

/// Index value meaning "not selected".
pub const UNSET: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("{0} out of range")]
    OutOfRange(&'static str),
    #[error("{0} requires tft_idx")]
    MissingTestGroup(&'static str),
    #[error("no {0} set")]
    Unset(&'static str),
}

/// Cheap value object selecting a test group, test case and connection.
#[derive(Debug, Clone)]
pub struct ConfigDescriptor {
    tc: Arc<TestConfig>,
    tft_idx: i32,
    test_cases_idx: i32,
    connections_idx: i32,
}

impl ConfigDescriptor {
    /// Descriptor with nothing selected.
    pub fn new(tc: Arc<TestConfig>) -> Self {
        Self {
            tc,
            tft_idx: UNSET,
            test_cases_idx: UNSET,
            connections_idx: UNSET,
        }
    }

    /// Build a descriptor and check the indices against the configuration.
    pub fn with_indices(
        tc: Arc<TestConfig>,
        tft_idx: i32,
        test_cases_idx: i32,
        connections_idx: i32,
    ) -> Result<Self, DescriptorError> {
        let d = Self {
            tc,
            tft_idx,
            test_cases_idx,
            connections_idx,
        };
        d.post_check()?;
        Ok(d)
    }

    fn post_check(&self) -> Result<(), DescriptorError> {
        let tft = &self.tc.config.tft;
        if self.tft_idx < UNSET || self.tft_idx >= len_i32(tft.len()) {
            return Err(DescriptorError::OutOfRange("tft_idx"));
        }

        if self.test_cases_idx < UNSET {
            return Err(DescriptorError::OutOfRange("test_cases_idx"));
        }
        if self.test_cases_idx >= 0 {
            if self.tft_idx < 0 {
                return Err(DescriptorError::MissingTestGroup("test_cases_idx"));
            }
            let group = &tft[self.tft_idx as usize];
            if self.test_cases_idx >= len_i32(group.test_cases.len()) {
                return Err(DescriptorError::OutOfRange("test_cases_idx"));
            }
        }

        if self.connections_idx < UNSET {
            return Err(DescriptorError::OutOfRange("connections_idx"));
        }
        if self.connections_idx >= 0 {
            if self.tft_idx < 0 {
                return Err(DescriptorError::MissingTestGroup("connections_idx"));
            }
            let group = &tft[self.tft_idx as usize];
            if self.connections_idx >= len_i32(group.connections.len()) {
                return Err(DescriptorError::OutOfRange("connections_idx"));
            }
        }
        Ok(())
    }

    pub fn test_config(&self) -> &Arc<TestConfig> {
        &self.tc
    }

    /// Selected test group, or `None`.
    pub fn tft_idx(&self) -> Option<usize> {
        usize::try_from(self.tft_idx).ok()
    }

    pub fn test_cases_idx(&self) -> Option<usize> {
        usize::try_from(self.test_cases_idx).ok()
    }

    pub fn connections_idx(&self) -> Option<usize> {
        usize::try_from(self.connections_idx).ok()
    }

    /// True when test group, test case and connection are all selected.
    pub fn is_leaf(&self) -> bool {
        self.tft_idx >= 0 && self.test_cases_idx >= 0 && self.connections_idx >= 0
    }

    pub fn get_test_group(&self) -> Result<&TestGroup, DescriptorError> {
        let idx = self.tft_idx().ok_or(DescriptorError::Unset("tft_idx"))?;
        self.tc
            .config
            .tft
            .get(idx)
            .ok_or(DescriptorError::OutOfRange("tft_idx"))
    }

    pub fn get_test_case(&self) -> Result<TestCaseType, DescriptorError> {
        let idx = self
            .test_cases_idx()
            .ok_or(DescriptorError::Unset("test_cases_idx"))?;
        self.get_test_group()?
            .test_cases
            .get(idx)
            .copied()
            .ok_or(DescriptorError::OutOfRange("test_cases_idx"))
    }

    pub fn get_connection(&self) -> Result<&Connection, DescriptorError> {
        let idx = self
            .connections_idx()
            .ok_or(DescriptorError::Unset("connections_idx"))?;
        self.get_test_group()?
            .connections
            .get(idx)
            .ok_or(DescriptorError::OutOfRange("connections_idx"))
    }

    pub fn get_server(&self) -> Result<&ServerNode, DescriptorError> {
        self.get_connection()?
            .server
            .first()
            .ok_or(DescriptorError::Unset("server"))
    }

    pub fn get_client(&self) -> Result<&ClientNode, DescriptorError> {
        self.get_connection()?
            .client
            .first()
            .ok_or(DescriptorError::Unset("client"))
    }

    /// One descriptor per test group. Other selections are dropped.
    pub fn describe_all_test_groups(&self) -> impl Iterator<Item = ConfigDescriptor> + '_ {
        (0..self.tc.config.tft.len()).map(move |idx| ConfigDescriptor {
            tc: self.tc.clone(),
            tft_idx: idx as i32,
            test_cases_idx: UNSET,
            connections_idx: UNSET,
        })
    }

    /// One descriptor per test case of the selected test group, keeping the
    /// selected connection. Empty when no test group is selected.
    pub fn describe_all_test_cases(&self) -> impl Iterator<Item = ConfigDescriptor> + '_ {
        let count = self.get_test_group().map(|g| g.test_cases.len()).unwrap_or(0);
        (0..count).map(move |idx| ConfigDescriptor {
            tc: self.tc.clone(),
            tft_idx: self.tft_idx,
            test_cases_idx: idx as i32,
            connections_idx: self.connections_idx,
        })
    }

    /// One descriptor per connection of the selected test group, keeping the
    /// selected test case. Empty when no test group is selected.
    pub fn describe_all_connections(&self) -> impl Iterator<Item = ConfigDescriptor> + '_ {
        let count = self.get_test_group().map(|g| g.connections.len()).unwrap_or(0);
        (0..count).map(move |idx| ConfigDescriptor {
            tc: self.tc.clone(),
            tft_idx: self.tft_idx,
            test_cases_idx: self.test_cases_idx,
            connections_idx: idx as i32,
        })
    }
}

fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}
