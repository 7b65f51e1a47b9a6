// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host-provided classes and methods.
//!
//! Besides a minimal `java/lang` surface, this binds the telemetry entry
//! points of [`crate::weave::contract`] to the host's registry. Recording
//! entry points never throw into the calling code: a missing handle or a
//! bad label array is logged and the sample dropped.

use std::time::Duration;

use tracing::warn;

use crate::error::HostError;
use crate::unit::{FieldType, OBJECT_CLASS};
use crate::weave::contract;
use crate::weave::MetricKind;

use super::value::{MetricHandle, ObjectData, Value};
use super::{Host, Trap, THROWABLE};

/// Resolves `getNestedProperty(base, path)` for nested label values.
pub trait PropertyResolver {
    /// Value at the dotted `path` below `base`, or null when any step is
    /// missing.
    fn resolve(&self, base: &Value, path: &str) -> Value;
}

/// Walks instance fields by name: `customer.address.city`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldPathResolver;

impl PropertyResolver for FieldPathResolver {
    fn resolve(&self, base: &Value, path: &str) -> Value {
        path.split('.')
            .try_fold(base.clone(), |current, segment| {
                let next = current.as_ref()?.borrow().field(segment).cloned();
                next
            })
            .unwrap_or(Value::Null)
    }
}

const THROWABLES: &[(&str, &str)] = &[
    (THROWABLE, OBJECT_CLASS),
    ("java/lang/Exception", THROWABLE),
    ("java/lang/Error", THROWABLE),
    ("java/lang/RuntimeException", "java/lang/Exception"),
    ("java/lang/InterruptedException", "java/lang/Exception"),
    ("java/lang/IllegalStateException", "java/lang/RuntimeException"),
    ("java/lang/IllegalArgumentException", "java/lang/RuntimeException"),
    ("java/lang/ArithmeticException", "java/lang/RuntimeException"),
    ("java/lang/NullPointerException", "java/lang/RuntimeException"),
    ("java/lang/NegativeArraySizeException", "java/lang/RuntimeException"),
    ("java/lang/ArrayIndexOutOfBoundsException", "java/lang/RuntimeException"),
];

const BOXES: &[(&str, FieldType)] = &[
    ("java/lang/Boolean", FieldType::Boolean),
    ("java/lang/Byte", FieldType::Byte),
    ("java/lang/Character", FieldType::Char),
    ("java/lang/Short", FieldType::Short),
    ("java/lang/Integer", FieldType::Int),
    ("java/lang/Long", FieldType::Long),
    ("java/lang/Float", FieldType::Float),
    ("java/lang/Double", FieldType::Double),
];

/// Superclass of a host-provided class, `None` for unknown classes and for
/// `java/lang/Object` itself.
pub fn builtin_super(class: &str) -> Option<&'static str> {
    if let Some((_, parent)) = THROWABLES.iter().find(|(name, _)| *name == class) {
        return Some(*parent);
    }
    if BOXES.iter().any(|(name, _)| *name == class)
        || class == contract::STRING_CLASS
        || class == contract::COUNTER_CLASS
        || class == contract::GAUGE_CLASS
        || class == contract::HISTOGRAM_CLASS
    {
        return Some(OBJECT_CLASS);
    }
    None
}

fn arg(args: &[Value], index: usize) -> Result<&Value, Trap> {
    args.get(index).ok_or_else(|| {
        Trap::Fatal(HostError::Execution {
            method: "native".to_string(),
            message: format!("missing argument {}", index),
        })
    })
}

/// Label values from a `String[]` argument; `None` for null.
fn label_values(value: &Value) -> Option<Vec<String>> {
    let array = value.as_ref()?;
    let array = array.borrow();
    match &array.data {
        ObjectData::Array(items) => Some(items.iter().map(Value::display_string).collect()),
        _ => None,
    }
}

fn metric_handle(value: &Value) -> Option<MetricHandle> {
    let obj = value.as_ref()?;
    let obj = obj.borrow();
    match &obj.data {
        ObjectData::Metric(handle) => Some(handle.clone()),
        _ => None,
    }
}

pub(super) fn install(host: &mut Host) {
    install_lang(host);
    install_metric_system(host);
}

fn install_lang(host: &mut Host) {
    host.register_native(OBJECT_CLASS, "<init>", "()V", |_, _| Ok(None));
    host.register_native(OBJECT_CLASS, "toString", "()Ljava/lang/String;", |host, args| {
        let text = arg(&args, 0)?.display_string();
        Ok(Some(host.new_string(text)))
    });
    host.register_native(OBJECT_CLASS, "hashCode", "()I", |_, args| {
        let id = arg(&args, 0)?.object_id().unwrap_or(0);
        Ok(Some(Value::Int(id as i32)))
    });

    for (class, _) in THROWABLES {
        host.register_native(class, "<init>", "()V", |_, _| Ok(None));
        host.register_native(class, "<init>", "(Ljava/lang/String;)V", |_, args| {
            let receiver = arg(&args, 0)?;
            let message = arg(&args, 1)?.clone();
            if let Some(obj) = receiver.as_ref() {
                if let ObjectData::Instance(fields) = &mut obj.borrow_mut().data {
                    fields.insert("message".to_string(), message);
                }
            }
            Ok(None)
        });
    }
    host.register_native(THROWABLE, "getMessage", "()Ljava/lang/String;", |_, args| {
        let receiver = arg(&args, 0)?;
        let message = receiver
            .as_ref()
            .and_then(|obj| obj.borrow().field("message").cloned());
        Ok(Some(message.unwrap_or(Value::Null)))
    });

    host.register_native(contract::SYSTEM_CLASS, "nanoTime", "()J", |host, _| {
        Ok(Some(Value::Long(host.nanos_since_start())))
    });
    host.register_native("java/lang/Thread", "sleep", "(J)V", |_, args| {
        let millis = arg(&args, 0)?.as_long().unwrap_or(0).max(0);
        std::thread::sleep(Duration::from_millis(millis as u64));
        Ok(None)
    });
    host.register_native(
        contract::STRING_CLASS,
        "valueOf",
        "(Ljava/lang/Object;)Ljava/lang/String;",
        |host, args| {
            let text = arg(&args, 0)?.display_string();
            Ok(Some(host.new_string(text)))
        },
    );

    for (class, ty) in BOXES {
        let descriptor = format!("({})L{};", ty, class);
        host.register_native(class, "valueOf", &descriptor, move |host, args| {
            let value = arg(&args, 0)?.clone();
            Ok(Some(Value::Ref(host.alloc(class, ObjectData::Boxed(value)))))
        });
    }

    host.register_native(
        contract::PROPERTIES,
        contract::GET_NESTED_PROPERTY,
        contract::GET_NESTED_PROPERTY_DESC,
        |host, args| {
            let base = arg(&args, 0)?;
            let path = arg(&args, 1)?.as_str().unwrap_or_default();
            Ok(Some(host.resolver.resolve(base, &path)))
        },
    );
}

fn install_metric_system(host: &mut Host) {
    for kind in MetricKind::ALL {
        let descriptor = contract::create_descriptor(kind);
        host.register_native(
            contract::METRIC_SYSTEM,
            kind.create_method(),
            &descriptor,
            move |host, args| create_handle(host, kind, &args),
        );
    }

    host.register_native(
        contract::METRIC_SYSTEM,
        contract::RECORD_COUNT,
        contract::RECORD_COUNT_DESC,
        |_, args| {
            record(&args, |handle, labels| match handle {
                MetricHandle::Counter(c) => c.inc(labels),
                other => mismatched(&other, "recordCount"),
            })
        },
    );
    host.register_native(
        contract::METRIC_SYSTEM,
        contract::RECORD_COUNT,
        contract::RECORD_COUNT_N_DESC,
        |_, args| {
            let n = arg(&args, 2)?.as_long().unwrap_or(0);
            record(&args, |handle, labels| match handle {
                MetricHandle::Counter(c) => c.inc_by(labels, n),
                other => mismatched(&other, "recordCount"),
            })
        },
    );
    host.register_native(
        contract::METRIC_SYSTEM,
        contract::RECORD_GAUGE_INC,
        contract::RECORD_GAUGE_DESC,
        |_, args| {
            record(&args, |handle, labels| match handle {
                MetricHandle::Gauge(g) => g.inc(labels),
                other => mismatched(&other, "recordGaugeInc"),
            })
        },
    );
    host.register_native(
        contract::METRIC_SYSTEM,
        contract::RECORD_GAUGE_DEC,
        contract::RECORD_GAUGE_DESC,
        |_, args| {
            record(&args, |handle, labels| match handle {
                MetricHandle::Gauge(g) => g.dec(labels),
                other => mismatched(&other, "recordGaugeDec"),
            })
        },
    );
    host.register_native(
        contract::METRIC_SYSTEM,
        contract::RECORD_TIME,
        contract::RECORD_TIME_DESC,
        |_, args| {
            let nanos = arg(&args, 2)?.as_long().unwrap_or(0);
            record(&args, |handle, labels| match handle {
                MetricHandle::Histogram(h) => h.observe(labels, nanos),
                other => mismatched(&other, "recordTime"),
            })
        },
    );
}

/// `createAndRegister*`: returns null (and logs) if the registry refuses.
fn create_handle(host: &mut Host, kind: MetricKind, args: &[Value]) -> Result<Option<Value>, Trap> {
    let name = arg(args, 0)?.as_str().unwrap_or_default();
    let label_names = label_values(arg(args, 1)?).unwrap_or_default();
    let doc = arg(args, 2)?.as_str().unwrap_or_default();

    let registry = host.registry.clone();
    let handle = match kind {
        MetricKind::Counter | MetricKind::ExceptionCounter => registry
            .counter(&name, &doc, &label_names)
            .map(MetricHandle::Counter),
        MetricKind::Gauge => registry
            .gauge(&name, &doc, &label_names)
            .map(MetricHandle::Gauge),
        MetricKind::Timer => registry
            .histogram(&name, &doc, &label_names)
            .map(MetricHandle::Histogram),
    };

    match handle {
        Ok(handle) => Ok(Some(Value::Ref(
            host.alloc(kind.handle_class(), ObjectData::Metric(handle)),
        ))),
        Err(e) => {
            warn!(metric = %name, error = %e, "Metric creation failed, recording disabled");
            Ok(Some(Value::Null))
        }
    }
}

fn record(args: &[Value], apply: impl FnOnce(MetricHandle, Option<&[String]>)) -> Result<Option<Value>, Trap> {
    let Some(handle) = metric_handle(arg(args, 0)?) else {
        warn!("Recording against a missing metric handle, sample dropped");
        return Ok(None);
    };
    let labels = label_values(arg(args, 1)?);
    apply(handle, labels.as_deref());
    Ok(None)
}

fn mismatched(handle: &MetricHandle, entry: &str) {
    warn!(?handle, entry, "Handle kind does not match entry point, sample dropped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::telemetry::Registry;

    fn host() -> Host {
        Host::new(Arc::new(Registry::new()))
    }

    #[test]
    fn test_builtin_hierarchy() {
        let host = host();
        assert!(host.is_subclass("java/lang/IllegalStateException", THROWABLE));
        assert!(host.is_subclass("java/lang/ArithmeticException", "java/lang/Exception"));
        assert!(!host.is_subclass("java/lang/Error", "java/lang/Exception"));
        assert_eq!(builtin_super("java/lang/Integer"), Some(OBJECT_CLASS));
        assert_eq!(builtin_super("com/acme/Thing"), None);
    }

    #[test]
    fn test_field_path_resolver() {
        let mut host = host();
        let city = host.new_string("Oslo");
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), city);
        let address = Value::Ref(host.alloc("a/Address", ObjectData::Instance(address)));
        let mut customer = BTreeMap::new();
        customer.insert("address".to_string(), address);
        let customer = Value::Ref(host.alloc("a/Customer", ObjectData::Instance(customer)));

        let resolver = FieldPathResolver;
        assert_eq!(
            resolver.resolve(&customer, "address.city").as_str().as_deref(),
            Some("Oslo")
        );
        assert!(resolver.resolve(&customer, "address.zip").is_null());
        assert!(resolver.resolve(&Value::Null, "address").is_null());
    }

    #[test]
    fn test_metric_natives_record_into_registry() {
        let mut host = host();
        let name = host.new_string("jobs");
        let doc = host.new_string("Jobs run");
        let handle = host
            .call_static(
                contract::METRIC_SYSTEM,
                MetricKind::Counter.create_method(),
                &contract::create_descriptor(MetricKind::Counter),
                vec![name, Value::Null, doc],
            )
            .unwrap()
            .unwrap();

        for _ in 0..3 {
            host.call_static(
                contract::METRIC_SYSTEM,
                contract::RECORD_COUNT,
                contract::RECORD_COUNT_DESC,
                vec![handle.clone(), Value::Null],
            )
            .unwrap();
        }
        assert_eq!(host.registry().counter_value("jobs", &[]), 3);
    }

    #[test]
    fn test_recording_tolerates_null_handle() {
        let mut host = host();
        let result = host.call_static(
            contract::METRIC_SYSTEM,
            contract::RECORD_TIME,
            contract::RECORD_TIME_DESC,
            vec![Value::Null, Value::Null, Value::Long(5)],
        );
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_conflicting_creation_yields_null_handle() {
        let mut host = host();
        host.registry().gauge("taken", "", &[]).unwrap();
        let name = host.new_string("taken");
        let doc = host.new_string("");
        let handle = host
            .call_static(
                contract::METRIC_SYSTEM,
                MetricKind::Counter.create_method(),
                &contract::create_descriptor(MetricKind::Counter),
                vec![name, Value::Null, doc],
            )
            .unwrap();
        assert!(matches!(handle, Some(Value::Null)));
    }

    #[test]
    fn test_boxing_and_value_of() {
        let mut host = host();
        let boxed = host
            .call_static("java/lang/Long", "valueOf", "(J)Ljava/lang/Long;", vec![Value::Long(9)])
            .unwrap()
            .unwrap();
        let text = host
            .call_static(
                contract::STRING_CLASS,
                "valueOf",
                "(Ljava/lang/Object;)Ljava/lang/String;",
                vec![boxed],
            )
            .unwrap()
            .unwrap();
        assert_eq!(text.as_str().as_deref(), Some("9"));
    }
}
