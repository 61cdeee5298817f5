//! Turns a decoded [`MpptBlock`] into one value per module channel.
//!
//! Scale factors are applied here. A raw value the device marked as not
//! implemented, or a value whose scale factor is not implemented, becomes
//! [`ChannelValue::Undefined`].

use crate::channel::{names, ChannelUid, GroupId, Unit};
use crate::protocol::{ModuleRecord, MpptBlock, OperatingState, ScaleFactor, ScaleFactors};
use std::fmt;

/// A published channel value.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelValue {
    Number(u32),
    Quantity { value: f64, unit: Unit },
    Text(String),
    State(OperatingState),
    Undefined,
}

impl ChannelValue {
    fn number(raw: Option<impl Into<u32>>) -> Self {
        raw.map_or(Self::Undefined, |raw| Self::Number(raw.into()))
    }

    fn scaled(raw: Option<impl Into<f64>>, scale_factor: Option<ScaleFactor>, unit: Unit) -> Self {
        match (raw, scale_factor) {
            (Some(raw), Some(scale_factor)) => Self::Quantity {
                value: scale_factor.apply(raw),
                unit,
            },
            _ => Self::Undefined,
        }
    }

    fn unscaled(raw: Option<impl Into<f64>>, unit: Unit) -> Self {
        raw.map_or(Self::Undefined, |raw| Self::Quantity {
            value: raw.into(),
            unit,
        })
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Quantity { value, unit } => write!(f, "{value} {unit}"),
            Self::Text(text) => f.write_str(text),
            Self::State(state) => write!(f, "{state}"),
            Self::Undefined => f.write_str("UNDEF"),
        }
    }
}

/// Values of all channels of one module group.
pub fn module_channel_values(
    group: GroupId,
    module: &ModuleRecord,
    scale_factors: &ScaleFactors,
) -> Vec<(ChannelUid, ChannelValue)> {
    let uid = |name: &str| ChannelUid::new(group, name);
    vec![
        (uid(names::MODULE_ID), ChannelValue::number(module.module_id)),
        (uid(names::ID_STRING), ChannelValue::Text(module.id_string.clone())),
        (
            uid(names::CURRENT),
            ChannelValue::scaled(module.current, scale_factors.current, Unit::Ampere),
        ),
        (
            uid(names::VOLTAGE),
            ChannelValue::scaled(module.voltage, scale_factors.voltage, Unit::Volt),
        ),
        (
            uid(names::POWER),
            ChannelValue::scaled(module.power, scale_factors.power, Unit::Watt),
        ),
        (
            uid(names::LIFETIME_ENERGY),
            ChannelValue::scaled(module.lifetime_energy, scale_factors.energy, Unit::WattHour),
        ),
        (
            uid(names::TIMESTAMP),
            ChannelValue::unscaled(module.timestamp, Unit::Second),
        ),
        (
            uid(names::TEMPERATURE),
            ChannelValue::unscaled(module.temperature, Unit::DegreeCelsius),
        ),
        (
            uid(names::OPERATING_STATE),
            module
                .operating_state
                .map_or(ChannelValue::Undefined, ChannelValue::State),
        ),
        (uid(names::EVENTS), ChannelValue::number(module.events)),
    ]
}

/// Values of all channels of all modules in `block`, module by module.
pub fn module_values(block: &MpptBlock) -> Vec<(ChannelUid, ChannelValue)> {
    block
        .modules
        .iter()
        .zip(0u16..)
        .flat_map(|(module, index)| {
            module_channel_values(GroupId::new(index), module, &block.scale_factors)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::{encode_block, ModuleWords};
    use crate::protocol::{INT16_NOT_IMPLEMENTED, UINT16_NOT_IMPLEMENTED};

    fn value_of<'a>(
        values: &'a [(ChannelUid, ChannelValue)],
        group: u16,
        name: &str,
    ) -> &'a ChannelValue {
        let uid = ChannelUid::new(GroupId::new(group), name);
        &values
            .iter()
            .find(|(candidate, _)| *candidate == uid)
            .unwrap_or_else(|| panic!("no value for {uid}"))
            .1
    }

    fn assert_quantity(value: &ChannelValue, expected: f64, expected_unit: Unit) {
        match value {
            ChannelValue::Quantity { value, unit } => {
                assert!(
                    (value - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                    "{value} != {expected}"
                );
                assert_eq!(*unit, expected_unit);
            }
            other => panic!("expected quantity, got {other:?}"),
        }
    }

    #[test]
    fn two_module_scenario() {
        let words = encode_block(
            [-2, -1, 0, 0],
            &[
                ModuleWords {
                    current: 150,
                    ..Default::default()
                },
                ModuleWords {
                    temperature: INT16_NOT_IMPLEMENTED,
                    ..Default::default()
                },
            ],
        );
        let block = MpptBlock::decode_from_holding_registers(&words).unwrap();
        let values = module_values(&block);

        assert_quantity(value_of(&values, 0, names::CURRENT), 1.5, Unit::Ampere);
        assert!(value_of(&values, 1, names::TEMPERATURE).is_undefined());
        assert_quantity(
            value_of(&values, 0, names::TEMPERATURE),
            41.0,
            Unit::DegreeCelsius,
        );
    }

    #[test]
    fn scaled_values_match_raw_times_power_of_ten() {
        let module = ModuleWords {
            current: 1234,
            voltage: 4051,
            power: 987,
            energy: 7_654_321,
            ..Default::default()
        };
        for scale_factors in [[-3, -2, 1, 2], [0, 0, 0, 0], [2, -1, -2, -3]] {
            let words = encode_block(scale_factors, &[module.clone()]);
            let block = MpptBlock::decode_from_holding_registers(&words).unwrap();
            let values = module_values(&block);
            let expect = |raw: f64, sf: i16| raw * 10f64.powi(sf.into());

            assert_quantity(
                value_of(&values, 0, names::CURRENT),
                expect(1234.0, scale_factors[0]),
                Unit::Ampere,
            );
            assert_quantity(
                value_of(&values, 0, names::VOLTAGE),
                expect(4051.0, scale_factors[1]),
                Unit::Volt,
            );
            assert_quantity(
                value_of(&values, 0, names::POWER),
                expect(987.0, scale_factors[2]),
                Unit::Watt,
            );
            assert_quantity(
                value_of(&values, 0, names::LIFETIME_ENERGY),
                expect(7_654_321.0, scale_factors[3]),
                Unit::WattHour,
            );
        }
    }

    #[test]
    fn sentinel_is_undefined_for_any_scale_factor() {
        for sf in [-3, 0, 4] {
            let words = encode_block(
                [sf, sf, sf, sf],
                &[ModuleWords {
                    current: UINT16_NOT_IMPLEMENTED,
                    voltage: UINT16_NOT_IMPLEMENTED,
                    power: UINT16_NOT_IMPLEMENTED,
                    energy: 0,
                    ..Default::default()
                }],
            );
            let block = MpptBlock::decode_from_holding_registers(&words).unwrap();
            let values = module_values(&block);
            for name in [
                names::CURRENT,
                names::VOLTAGE,
                names::POWER,
                names::LIFETIME_ENERGY,
            ] {
                assert!(value_of(&values, 0, name).is_undefined(), "{name}");
            }
        }
    }

    #[test]
    fn missing_scale_factor_is_undefined() {
        let mut words = encode_block([-2, -1, 0, 0], &[ModuleWords::default()]);
        words[2] = 0x8000;
        let block = MpptBlock::decode_from_holding_registers(&words).unwrap();
        let values = module_values(&block);
        assert!(value_of(&values, 0, names::CURRENT).is_undefined());
        assert!(!value_of(&values, 0, names::VOLTAGE).is_undefined());
    }

    #[test]
    fn text_and_state_channels() {
        let words = encode_block(
            [0, 0, 0, 0],
            &[
                ModuleWords {
                    id: 7,
                    id_string: "East roof",
                    state: 4,
                    events: 0x0000_0101,
                    ..Default::default()
                },
                ModuleWords {
                    id_string: "",
                    state: 42,
                    ..Default::default()
                },
            ],
        );
        let block = MpptBlock::decode_from_holding_registers(&words).unwrap();
        let values = module_values(&block);

        assert_eq!(values.len(), 20);
        assert_eq!(value_of(&values, 0, names::MODULE_ID), &ChannelValue::Number(7));
        assert_eq!(
            value_of(&values, 0, names::ID_STRING),
            &ChannelValue::Text("East roof".to_string())
        );
        assert_eq!(
            value_of(&values, 0, names::OPERATING_STATE).to_string(),
            "ON"
        );
        assert_eq!(value_of(&values, 0, names::EVENTS), &ChannelValue::Number(0x101));
        assert_eq!(
            value_of(&values, 1, names::ID_STRING),
            &ChannelValue::Text(String::new())
        );
        assert_eq!(
            value_of(&values, 1, names::OPERATING_STATE),
            &ChannelValue::State(OperatingState::Unknown(42))
        );
    }

    #[test]
    fn display() {
        assert_eq!(
            ChannelValue::Quantity {
                value: 1.5,
                unit: Unit::Ampere
            }
            .to_string(),
            "1.5 A"
        );
        assert_eq!(ChannelValue::Undefined.to_string(), "UNDEF");
    }
}
