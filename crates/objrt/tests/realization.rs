//! Realizing descriptors and loading images.

mod common;

use std::sync::{Arc, Mutex};

use common::{BASE, marker, realize, runtime, send};
use objrt::runtime::{ClassFlags, ProtocolDescriptor};
use objrt::{CategoryDescriptor, Class, ClassDescriptor, Error, Image, Selector, SelectorHandle};

#[test]
fn test_realize_twice_returns_same_class() {
    let rt = runtime();
    let desc = Arc::new(ClassDescriptor::root("Twice").method("a", "v@:", marker(BASE)));

    let first = rt.realize(&desc).unwrap();
    let second = rt.realize(&desc).unwrap();

    assert_eq!(first, second);
    assert_eq!(rt.all_classes(), vec![first]);
    assert_eq!(first.method_list().len(), 1);
}

#[test]
fn test_duplicate_name_keeps_first() {
    let rt = runtime();
    let first = realize(rt, ClassDescriptor::root("Twin").method("who", "v@:", marker(1)));

    let err = rt
        .realize(&Arc::new(ClassDescriptor::root("Twin").method("who", "v@:", marker(2))))
        .unwrap_err();

    assert_eq!(err, Error::ClassAlreadyExists { name: "Twin".into() });
    assert_eq!(send(rt, first, Selector::intern("who")), Some(1));
}

#[test]
fn test_out_of_order_chain_resolves() {
    let rt = runtime();
    let c = realize(rt, ClassDescriptor::new("ChainC", "ChainB"));
    let b = realize(rt, ClassDescriptor::new("ChainB", "ChainA"));

    assert!(c.flags().contains(ClassFlags::FUTURE));
    assert!(b.flags().contains(ClassFlags::FUTURE));
    assert!(rt.lookup(c, Selector::intern("ping")).is_forward());

    let a = realize(rt, ClassDescriptor::root("ChainA").method("ping", "v@:", marker(7)));

    assert_eq!(c.superclass(), Some(b));
    assert_eq!(b.superclass(), Some(a));
    assert_eq!(send(rt, c, Selector::intern("ping")), Some(7));
    assert_eq!(rt.all_classes().len(), 3);
}

#[test]
fn test_future_class_waits_for_registered_class() {
    let rt = runtime();
    let parked = realize(rt, ClassDescriptor::new("OnDynamic", "Dynamic"));

    let dynamic = rt.allocate_class(None, "Dynamic").unwrap();
    assert!(parked.flags().contains(ClassFlags::FUTURE));

    rt.register_class(dynamic).unwrap();
    assert_eq!(parked.superclass(), Some(dynamic));
    assert!(parked.flags().contains(ClassFlags::REALIZED));
}

#[test]
fn test_cycle_is_rejected() {
    let rt = runtime();
    let x = realize(rt, ClassDescriptor::new("LoopX", "LoopY"));
    let y = realize(rt, ClassDescriptor::new("LoopY", "LoopZ"));

    let err = rt.realize(&Arc::new(ClassDescriptor::new("LoopZ", "LoopX"))).unwrap_err();

    assert_eq!(err, Error::InheritanceCycle { name: "LoopZ".into() });
    assert!(x.flags().contains(ClassFlags::INERT));
    assert!(y.flags().contains(ClassFlags::INERT));
    assert!(rt.lookup(x, Selector::intern("anything")).is_forward());
}

#[test]
fn test_metaclass_graph() {
    let rt = runtime();
    let root = realize(rt, ClassDescriptor::root("MetaRoot"));
    let mid = realize(rt, ClassDescriptor::new("MetaMid", "MetaRoot"));
    let leaf = realize(rt, ClassDescriptor::new("MetaLeaf", "MetaMid"));

    let root_meta = root.metaclass().unwrap();
    for class in [root, mid, leaf] {
        let meta = class.metaclass().unwrap();
        assert!(meta.is_metaclass());
        assert_eq!(meta.instance_class(), class);
        assert_eq!(meta.metaclass(), Some(root_meta));
    }

    assert_eq!(root_meta.superclass(), Some(root));
    assert_eq!(leaf.metaclass().unwrap().superclass(), mid.metaclass());
    assert!(root.is_root());
    assert!(!mid.is_root());
}

#[test]
fn test_ivars_slide_with_alignment() {
    let rt = runtime();
    realize(rt, ClassDescriptor::root("Wide").ivar("isa", "#", 0, 8, 3).ivar("a", "Q", 8, 8, 3).ivar("b", "I", 16, 4, 2));

    // Compiled when Wide was 8 bytes.
    let sub = realize(
        rt,
        ClassDescriptor::new("Narrow", "Wide")
            .instance_start(8)
            .ivar("v", "d", 8, 8, 3)
            .ivar("c", "C", 16, 1, 0),
    );

    // Wide is 20 bytes; the shift of 12 rounds up to 16 for the double.
    assert_eq!(sub.ivar("v").unwrap().offset(), 24);
    assert_eq!(sub.ivar("c").unwrap().offset(), 32);
    assert_eq!(sub.instance_size(), 40);
    assert_eq!(sub.ivar("v").unwrap().offset() % 8, 0);
}

#[test]
fn test_load_image_in_one_pass() {
    let rt = runtime();
    let image = Image::new()
        .protocol(ProtocolDescriptor::new("Drawable").method("draw", "v@:", true))
        .category(CategoryDescriptor::new("Debug", "Canvas").method("dump", "v@:", marker(3)))
        .class(ClassDescriptor::new("Canvas", "View").protocol("Drawable"))
        .class(ClassDescriptor::root("View").method("draw", "v@:", marker(4)));

    let report = rt.load_image(&image);

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.classes.len(), 2);
    assert_eq!(report.categories_attached, 1);

    let canvas = rt.class_named("Canvas").unwrap();
    let drawable = rt.protocol_named("Drawable").unwrap();
    assert!(canvas.conforms_to(drawable));
    assert_eq!(send(rt, canvas, Selector::intern("dump")), Some(3));
    assert_eq!(send(rt, canvas, Selector::intern("draw")), Some(4));
}

#[test]
fn test_unresolved_superclass_reported() {
    let rt = runtime();
    let report = rt.load_image(&Image::new().class(ClassDescriptor::new("Lost", "Nowhere")));

    assert_eq!(
        report.errors,
        vec![Error::UnresolvedSuperclass { class: "Lost".into(), superclass: "Nowhere".into() }]
    );
    assert_eq!(report.parked.len(), 1);
    assert!(rt.class_named("Lost").is_none());

    // A later image completes it.
    let later = rt.load_image(&Image::new().class(ClassDescriptor::root("Nowhere")));
    assert!(later.is_clean());
    assert!(rt.class_named("Lost").is_some());
}

static INIT_ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_initialize(
    receiver: *mut std::ffi::c_void,
    _: SelectorHandle,
    _: *const *mut u8,
    _: *mut u8,
) {
    // SAFETY: `initialize` is sent with the class as receiver.
    let class = unsafe { Class::from_ptr(receiver) };
    INIT_ORDER.lock().unwrap().push(class.name());
}

#[test]
fn test_initialize_superclass_first_and_once() {
    let rt = runtime();
    let init = objrt::Imp::new(record_initialize);
    realize(rt, ClassDescriptor::root("InitA").class_method("initialize", "v@:", init));
    realize(rt, ClassDescriptor::new("InitB", "InitA"));
    let c = realize(
        rt,
        ClassDescriptor::new("InitC", "InitB")
            .class_method("initialize", "v@:", init)
            .method("run", "v@:", marker(1)),
    );

    send(rt, c, Selector::intern("run"));
    send(rt, c, Selector::intern("run"));
    send(rt, c, Selector::intern("initRunAgain"));

    let order: Vec<_> = INIT_ORDER
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|n| n.starts_with("Init"))
        .collect();
    // InitB inherits +initialize from InitA.
    assert_eq!(order, vec!["InitA", "InitB", "InitC"]);
}
