//! Per-poll processing of a SunSpec MPPT block.
//!
//! [`MpptHandler`] owns the long-lived channel state of one device. Each call
//! to [`MpptHandler::handle_polled_data`] decodes the registers, reconciles
//! the channel groups with the reported module count and returns the values
//! to publish. Calls must not overlap; a failed cycle leaves everything as it
//! was and the next poll simply tries again.

use crate::channel::{self, ChannelSchema, ChannelUid, Reconciler, SchemaDelta, TemplateProvider};
use crate::protocol::{self as proto, MpptBlock};
use crate::publish::{self, ChannelValue};

/// Errors of a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] proto::Error),

    #[error(transparent)]
    Channel(#[from] channel::Error),
}

/// The outcome of one successful poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub block: MpptBlock,
    /// Groups added or removed in this cycle, empty if the module count held.
    pub delta: SchemaDelta,
    pub values: Vec<(ChannelUid, ChannelValue)>,
}

/// Handles data polled from one SunSpec MPPT device.
#[derive(Debug)]
pub struct MpptHandler<P, S> {
    provider: P,
    schema: S,
    reconciler: Reconciler,
}

impl<P: TemplateProvider, S: ChannelSchema> MpptHandler<P, S> {
    pub fn new(provider: P, schema: S) -> Self {
        Self {
            provider,
            schema,
            reconciler: Reconciler::new(),
        }
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    /// Number of channel groups the schema currently holds.
    pub fn group_count(&self) -> usize {
        self.schema.groups().len()
    }

    /// Processes one polled register block.
    ///
    /// # Errors
    ///
    /// * [`Error::Protocol`] if the block is malformed; nothing is published.
    /// * [`Error::Channel`] if channel definitions are unavailable; the
    ///   schema is unchanged and nothing is published.
    pub fn handle_polled_data(&mut self, registers: &[u16]) -> Result<PollOutcome, Error> {
        let block = MpptBlock::decode_from_holding_registers(registers)?;
        let module_count = u16::try_from(block.modules.len()).unwrap_or(u16::MAX);
        let delta = self
            .reconciler
            .reconcile(module_count, &self.provider, &mut self.schema)?;
        let values = publish::module_values(&block)
            .into_iter()
            .filter(|(uid, _)| self.schema.contains(uid))
            .collect();
        Ok(PollOutcome {
            block,
            delta,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelRegistry, GroupId, ModuleTemplate, MODULE_TEMPLATE_ID};
    use std::collections::BTreeSet;
    use crate::protocol::tests::{encode_block, ModuleWords};
    use assert_matches::assert_matches;

    fn block(module_count: usize) -> Vec<u16> {
        encode_block([-2, -1, 0, 0], &vec![ModuleWords::default(); module_count])
    }

    #[test]
    fn follows_module_count() {
        let registry = ChannelRegistry::new();
        let mut handler = MpptHandler::new(ModuleTemplate, registry.clone());

        let outcome = handler.handle_polled_data(&block(2)).unwrap();
        assert_eq!(outcome.delta.to_add.len(), 2);
        assert_eq!(outcome.values.len(), 20);
        assert_eq!(registry.groups().len(), 2);

        let outcome = handler.handle_polled_data(&block(2)).unwrap();
        assert!(outcome.delta.is_empty());

        let outcome = handler.handle_polled_data(&block(1)).unwrap();
        assert!(outcome.delta.to_remove.contains(&GroupId::new(1)));
        assert_eq!(outcome.values.len(), 10);
        assert_eq!(handler.group_count(), 1);
    }

    #[test]
    fn removes_stale_groups_of_existing_schema() {
        let mut registry = ChannelRegistry::new();
        for index in 0..5 {
            let definitions = ModuleTemplate
                .channel_definitions(GroupId::new(index), MODULE_TEMPLATE_ID)
                .unwrap();
            registry.replace(&BTreeSet::new(), definitions);
        }
        let mut handler = MpptHandler::new(ModuleTemplate, registry.clone());

        let outcome = handler.handle_polled_data(&block(2)).unwrap();
        assert!(outcome.delta.to_add.is_empty());
        assert_eq!(
            outcome.delta.to_remove,
            (2..5).map(GroupId::new).collect::<BTreeSet<_>>()
        );
        assert_eq!(
            registry.groups(),
            [GroupId::new(0), GroupId::new(1)].into_iter().collect()
        );
        assert_eq!(handler.group_count(), 2);
        assert_eq!(outcome.values.len(), 20);
    }

    #[test]
    fn malformed_block_changes_nothing() {
        let registry = ChannelRegistry::new();
        let mut handler = MpptHandler::new(ModuleTemplate, registry.clone());
        handler.handle_polled_data(&block(3)).unwrap();

        let mut truncated = block(4);
        truncated.truncate(40);
        assert_matches!(
            handler.handle_polled_data(&truncated),
            Err(Error::Protocol(proto::Error::MalformedBlock(..)))
        );
        assert_eq!(handler.group_count(), 3);
        assert_eq!(registry.groups().len(), 3);
    }

    #[test]
    fn template_failure_is_retried() {
        struct NoTemplate;

        impl TemplateProvider for NoTemplate {
            fn channel_definitions(
                &self,
                group: GroupId,
                template_id: &str,
            ) -> Result<Vec<channel::ChannelDefinition>, channel::Error> {
                Err(channel::Error::TemplateUnavailable {
                    group,
                    template: template_id.to_string(),
                })
            }
        }

        let mut handler = MpptHandler::new(NoTemplate, ChannelRegistry::new());
        for _ in 0..2 {
            assert_matches!(
                handler.handle_polled_data(&block(1)),
                Err(Error::Channel(channel::Error::TemplateUnavailable { .. }))
            );
            assert_eq!(handler.group_count(), 0);
        }
        assert!(handler.schema().snapshot().is_empty());
    }
}
