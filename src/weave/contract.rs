// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Binary contract between woven code and the telemetry runtime.
//!
//! Generated instructions call exactly these members. The reference host
//! binds the same names, so changing one side without the other breaks every
//! woven unit.

use crate::unit::{FieldType, Insn};

use super::model::MetricKind;

/// Class exposing the creation and recording entry points.
pub const METRIC_SYSTEM: &str = "weaver/runtime/MetricSystem";

pub const COUNTER_CLASS: &str = "weaver/runtime/Counter";
pub const GAUGE_CLASS: &str = "weaver/runtime/Gauge";
pub const HISTOGRAM_CLASS: &str = "weaver/runtime/Histogram";

/// Class exposing the nested property resolver.
pub const PROPERTIES: &str = "weaver/runtime/Properties";
pub const GET_NESTED_PROPERTY: &str = "getNestedProperty";
pub const GET_NESTED_PROPERTY_DESC: &str = "(Ljava/lang/Object;Ljava/lang/String;)Ljava/lang/Object;";

pub const RECORD_COUNT: &str = "recordCount";
pub const RECORD_COUNT_DESC: &str = "(Lweaver/runtime/Counter;[Ljava/lang/String;)V";
pub const RECORD_COUNT_N_DESC: &str = "(Lweaver/runtime/Counter;[Ljava/lang/String;J)V";
pub const RECORD_GAUGE_INC: &str = "recordGaugeInc";
pub const RECORD_GAUGE_DEC: &str = "recordGaugeDec";
pub const RECORD_GAUGE_DESC: &str = "(Lweaver/runtime/Gauge;[Ljava/lang/String;)V";
pub const RECORD_TIME: &str = "recordTime";
pub const RECORD_TIME_DESC: &str = "(Lweaver/runtime/Histogram;[Ljava/lang/String;J)V";

pub const STRING_CLASS: &str = "java/lang/String";
pub const OBJECT_CLASS: &str = "java/lang/Object";
pub const SYSTEM_CLASS: &str = "java/lang/System";
pub const THROWABLE_CLASS: &str = "java/lang/Throwable";

/// Marker annotation added to every rewritten unit.
pub const WOVEN_MARKER: &str = "Lweaver/annotation/Woven;";

/// Descriptor shared by all creation entry points, returning `handle_class`.
pub fn create_descriptor(kind: MetricKind) -> String {
    format!(
        "(Ljava/lang/String;[Ljava/lang/String;Ljava/lang/String;){}",
        kind.handle_descriptor()
    )
}

pub fn create_call(kind: MetricKind) -> Insn {
    Insn::invoke_static(METRIC_SYSTEM, kind.create_method(), create_descriptor(kind))
}

pub fn record_count() -> Insn {
    Insn::invoke_static(METRIC_SYSTEM, RECORD_COUNT, RECORD_COUNT_DESC)
}

pub fn record_gauge_inc() -> Insn {
    Insn::invoke_static(METRIC_SYSTEM, RECORD_GAUGE_INC, RECORD_GAUGE_DESC)
}

pub fn record_gauge_dec() -> Insn {
    Insn::invoke_static(METRIC_SYSTEM, RECORD_GAUGE_DEC, RECORD_GAUGE_DESC)
}

pub fn record_time() -> Insn {
    Insn::invoke_static(METRIC_SYSTEM, RECORD_TIME, RECORD_TIME_DESC)
}

pub fn nano_time() -> Insn {
    Insn::invoke_static(SYSTEM_CLASS, "nanoTime", "()J")
}

pub fn get_nested_property() -> Insn {
    Insn::invoke_static(PROPERTIES, GET_NESTED_PROPERTY, GET_NESTED_PROPERTY_DESC)
}

/// `String.valueOf(Object)`.
pub fn string_value_of() -> Insn {
    Insn::invoke_static(STRING_CLASS, "valueOf", "(Ljava/lang/Object;)Ljava/lang/String;")
}

/// Boxing call for a primitive type, e.g. `I` to `Integer.valueOf`.
/// Reference types need no boxing.
pub fn box_primitive(ty: &FieldType) -> Option<Insn> {
    let class = match ty {
        FieldType::Boolean => "java/lang/Boolean",
        FieldType::Byte => "java/lang/Byte",
        FieldType::Char => "java/lang/Character",
        FieldType::Short => "java/lang/Short",
        FieldType::Int => "java/lang/Integer",
        FieldType::Long => "java/lang/Long",
        FieldType::Float => "java/lang/Float",
        FieldType::Double => "java/lang/Double",
        FieldType::Object(_) | FieldType::Array(_) => return None,
    };
    Some(Insn::invoke_static(
        class,
        "valueOf",
        format!("({})L{};", ty, class),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::MethodDescriptor;

    #[test]
    fn test_contract_descriptors_parse() {
        for desc in [
            RECORD_COUNT_DESC,
            RECORD_COUNT_N_DESC,
            RECORD_GAUGE_DESC,
            RECORD_TIME_DESC,
            GET_NESTED_PROPERTY_DESC,
        ] {
            assert!(MethodDescriptor::parse(desc).is_ok(), "{}", desc);
        }
        for kind in MetricKind::ALL {
            let desc = MethodDescriptor::parse(&create_descriptor(kind)).unwrap();
            assert_eq!(desc.params.len(), 3);
        }
    }

    #[test]
    fn test_exception_counter_shares_counter_handle() {
        assert_eq!(
            create_descriptor(MetricKind::ExceptionCounter),
            "(Ljava/lang/String;[Ljava/lang/String;Ljava/lang/String;)Lweaver/runtime/Counter;"
        );
    }

    #[test]
    fn test_box_primitive() {
        assert_eq!(
            box_primitive(&FieldType::Long),
            Some(Insn::invoke_static(
                "java/lang/Long",
                "valueOf",
                "(J)Ljava/lang/Long;"
            ))
        );
        assert!(box_primitive(&FieldType::object("a/B")).is_none());
    }
}
