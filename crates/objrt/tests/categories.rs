//! Category attachment: precedence, ordering and parking.

mod common;

use std::sync::Arc;

use common::{BASE, marker, realize, runtime, send};
use objrt::runtime::ProtocolDescriptor;
use objrt::{CategoryDescriptor, Class, ClassDescriptor, Error, Image, Runtime, Selector};

fn host(rt: &Runtime, name: &str) -> Class {
    realize(rt, ClassDescriptor::root(name).method("shared", "v@:", marker(BASE)))
}

#[test]
fn test_unique_selectors_independent_of_order() {
    let forward = runtime();
    let backward = runtime();
    let a = Arc::new(CategoryDescriptor::new("A", "Host").method("fromA", "v@:", marker(3)));
    let b = Arc::new(CategoryDescriptor::new("B", "Host").method("fromB", "v@:", marker(4)));

    let f = host(forward, "Host");
    assert!(forward.apply_categories(f, &[a.clone(), b.clone()]).is_empty());
    let g = host(backward, "Host");
    assert!(backward.apply_categories(g, &[b, a]).is_empty());

    for sel in ["fromA", "fromB", "shared"] {
        let sel = Selector::intern(sel);
        assert_eq!(send(forward, f, sel), send(backward, g, sel));
    }
}

#[test]
fn test_category_beats_class_and_later_beats_earlier() {
    let rt = runtime();
    let class = host(rt, "Layered");
    let sub = realize(rt, ClassDescriptor::new("LayeredSub", "Layered"));
    let shared = Selector::intern("shared");

    assert_eq!(send(rt, sub, shared), Some(BASE));

    rt.apply_category(class, &CategoryDescriptor::new("First", "Layered").method("shared", "v@:", marker(5)))
        .unwrap();
    assert_eq!(send(rt, sub, shared), Some(5));

    rt.apply_category(class, &CategoryDescriptor::new("Second", "Layered").method("shared", "v@:", marker(6)))
        .unwrap();
    assert_eq!(send(rt, class, shared), Some(6));
    assert_eq!(send(rt, sub, shared), Some(6));

    // The class's own method is still listed, behind both categories.
    assert_eq!(class.method_list().len(), 3);
}

#[test]
fn test_class_methods_go_to_metaclass() {
    let rt = runtime();
    let class = host(rt, "Statics");
    let sel = Selector::intern("shared");

    rt.apply_category(class, &CategoryDescriptor::new("Meta", "Statics").class_method("shared", "v@:", marker(8)))
        .unwrap();

    assert_eq!(send(rt, class.metaclass().unwrap(), sel), Some(8));
    assert_eq!(send(rt, class, sel), Some(BASE));
}

#[test]
fn test_duplicate_category_name_rejected() {
    let rt = runtime();
    let class = host(rt, "DupCat");
    let category = CategoryDescriptor::new("Extras", "DupCat").method("x", "v@:", marker(2));

    rt.apply_category(class, &category).unwrap();
    assert_eq!(
        rt.apply_category(class, &category).unwrap_err(),
        Error::CategoryAlreadyExists { class: "DupCat".into(), category: "Extras".into() }
    );
}

#[test]
fn test_parked_categories_attach_in_load_order() {
    let rt = runtime();
    rt.load_image(
        &Image::new()
            .category(CategoryDescriptor::new("One", "Later").method("shared", "v@:", marker(10)))
            .category(CategoryDescriptor::new("Two", "Later").method("shared", "v@:", marker(11))),
    );

    let class = host(rt, "Later");
    assert_eq!(send(rt, class, Selector::intern("shared")), Some(11));
}

#[test]
fn test_category_protocols_and_properties() {
    let rt = runtime();
    let class = host(rt, "Decorated");
    let protocol = rt.register_protocol(&ProtocolDescriptor::new("Printable")).unwrap();

    rt.apply_category(
        class,
        &CategoryDescriptor::new("Printing", "Decorated")
            .protocol("Printable")
            .property("summary", "T@,R"),
    )
    .unwrap();

    assert!(class.conforms_to(protocol));
    assert_eq!(class.property("summary").map(|p| p.attributes()), Some("T@,R"));
}

#[test]
fn test_category_on_disposed_class_rejected() {
    let rt = runtime();
    let class = host(rt, "Gone");
    rt.dispose_class(class).unwrap();

    assert_eq!(
        rt.apply_category(class, &CategoryDescriptor::new("Late", "Gone")).unwrap_err(),
        Error::ClassNotRegistered { name: "Gone".into() }
    );
}
