//! Integration tests: typed bindings together with state serialization
//!
//! Tests cover:
//! - Saving and restoring a host's globals that mix script data, scripted
//!   closures, native functions and class instances
//! - Class instances shared between globals keeping their identity
//! - Restoring into a host that lacks the class registration

use moonbind_core::{
    FormatError, ProtoBuilder, SerializeError, Serializer, SerializerOptions, Value, Vm,
};
use moonbind_sdk::{
    call_function, call_global, call_method, Class, ClassBuilder, FromValue, NativeFunctionRegistry,
};

#[derive(Debug, Clone, PartialEq)]
struct Inventory {
    items: Vec<String>,
}

fn inventory_class(vm: &mut Vm) -> Class<Inventory> {
    ClassBuilder::<Inventory>::new("Inventory")
        .method("add", |_, this, item: String| {
            this.items.push(item);
            Ok(this.items.len())
        })
        .method("count", |_, this, ()| Ok(this.items.len()))
        .serializable(
            |inv: &Inventory| inv.items.clone(),
            |items: Vec<String>| Ok(Inventory { items }),
        )
        .build(vm)
}

fn host(vm: &mut Vm) -> Class<Inventory> {
    let mut registry = NativeFunctionRegistry::new();
    registry.register("util.shout", |_, s: String| Ok(s.to_uppercase()));
    registry.install(vm).unwrap();
    inventory_class(vm)
}

/// function(s) return util.shout(s .. "!") end
fn shout_closure(vm: &Vm) -> moonbind_core::FunctionRef {
    let proto = ProtoBuilder::new("excite")
        .params(1)
        .get_global("util")
        .get_field("shout")
        .load_arg(0)
        .load_str("!")
        .concat()
        .call(1)
        .ret(1)
        .build()
        .unwrap();
    vm.create_closure(proto, vec![]).unwrap()
}

#[test]
fn test_save_and_restore_host_state() {
    let mut vm = Vm::new();
    let class = host(&mut vm);
    let bag: Value = class
        .instantiate(&vm, Inventory { items: vec!["rope".to_string()] })
        .into();
    vm.set_global("bag", bag.clone());
    vm.set_global("same_bag", bag.clone());
    vm.set_global("excite", shout_closure(&vm));
    call_method::<_, usize>(&mut vm, &bag, "add", "lamp").unwrap();

    // Native bindings belong to the host, not to the saved state
    let options = SerializerOptions::default().with_skip_global(|name| name == b"util");
    let mut bytes = Vec::new();
    Serializer::with_options(&mut vm, options)
        .serialize_state(&mut bytes)
        .unwrap();

    let mut restored = Vm::new();
    let restored_class = host(&mut restored);
    Serializer::new(&mut restored)
        .deserialize_state(&bytes[..])
        .unwrap();

    let bag = restored.get_global("bag");
    assert!(restored_class.is_instance(&bag));
    assert_eq!(restored.get_global("same_bag"), bag);
    assert_eq!(call_method::<_, usize>(&mut restored, &bag, "count", ()).unwrap(), 2);
    let inv = Inventory::clone(&bag.as_userdata().unwrap().borrow::<Inventory>().unwrap());
    assert_eq!(inv.items, vec!["rope", "lamp"]);

    // The restored closure resolves `util.shout` from the new host
    let out: String = call_global(&mut restored, "excite", "hi").unwrap();
    assert_eq!(out, "HI!");
}

#[test]
fn test_restore_without_class_registration_fails() {
    let mut vm = Vm::new();
    let class = inventory_class(&mut vm);
    let bag = class.instantiate(&vm, Inventory { items: vec![] });
    vm.set_global("bag", bag);

    let mut bytes = Vec::new();
    Serializer::new(&mut vm).serialize_state(&mut bytes).unwrap();

    let mut bare = Vm::new();
    let err = Serializer::new(&mut bare).deserialize_state(&bytes[..]);
    assert!(matches!(
        err,
        Err(SerializeError::Format(FormatError::MissingDeserializer(name))) if name == "Inventory"
    ));
}

#[test]
fn test_payload_conversion_error_surfaces() {
    let mut vm = Vm::new();
    inventory_class(&mut vm);

    // A table with a non-string item cannot become an Inventory
    let payload = vm.create_table();
    payload.raw_set(Value::Integer(1), Value::Boolean(true)).unwrap();
    let factory = vm.userdata_deserializer(b"Inventory").unwrap();
    let err = call_function::<_, Value>(&mut vm, &factory, Value::Table(payload)).unwrap_err();
    assert!(err.to_string().contains("Inventory.__deserialize"));
}

#[test]
fn test_typed_values_survive_serialization() {
    let mut vm = Vm::new();
    let original = vec![vec![1i64, 2], vec![], vec![3]];
    let value = moonbind_sdk::IntoValue::into_value(original.clone()).unwrap();

    let mut bytes = Vec::new();
    Serializer::new(&mut vm)
        .serialize_variable(&mut bytes, &value)
        .unwrap();
    let copy = Serializer::new(&mut vm)
        .deserialize_variable(&bytes[..])
        .unwrap();
    assert_eq!(Vec::<Vec<i64>>::from_value(copy).unwrap(), original);
}
