use std::sync::Arc;
use std::time::Duration;

use nova_model::testing::LineFrontEnd;
use nova_model::{
    CachePolicy, CancellationToken, ElementKind, Handle, ModelError, ParseError, Payload,
    StoreConfig,
};
use pretty_assertions::assert_eq;

use super::{package, unit, Fixture};

#[test]
fn containers_are_listed_from_resources() {
    let f = Fixture::new(&[
        ("src/B.java", "class B\n"),
        ("src/com/acme/A.java", "class A\n"),
        ("src/com/acme/C.java", "class C\n"),
    ]);

    let model = f.model.open_unit(&Handle::model()).unwrap();
    assert_eq!(model.children, vec![Handle::root("src")]);

    let root = f.model.open_unit(&Handle::root("src")).unwrap();
    assert_eq!(root.children, vec![package(""), package("com.acme")]);

    let acme = f.model.open_unit(&package("com.acme")).unwrap();
    assert_eq!(
        acme.children,
        vec![unit("com.acme", "A.java"), unit("com.acme", "C.java")]
    );
}

#[test]
fn members_are_materialized_through_their_unit() {
    let f = Fixture::new(&[("src/A.java", "class A\n  method run void String\n")]);
    let method = unit("", "A.java")
        .child(ElementKind::Type, "A")
        .child(ElementKind::Method, "run");

    let body = f.model.element_body(&method).unwrap();
    assert_eq!(
        body.payload,
        Payload::Method {
            modifiers: Vec::new(),
            return_type: "void".into(),
            parameters: vec!["String".into()],
        }
    );
    assert!(f.model.is_open(&unit("", "A.java")));

    let missing = unit("", "A.java").child(ElementKind::Type, "Missing");
    assert!(matches!(
        f.model.element_body(&missing),
        Err(ModelError::InvalidState { .. })
    ));
}

#[test]
fn cached_bodies_are_reused() {
    let f = Fixture::new(&[("src/A.java", "class A\n")]);
    let a = unit("", "A.java");
    let first = f.model.open_unit(&a).unwrap();
    let second = f.model.open_unit(&a).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(f.front_end.opens(), 1);
    assert_eq!(f.resources.reads(), 1);
}

#[test]
fn failed_open_leaves_no_partial_state() {
    let f = Fixture::new(&[("src/Bad.java", "class Bad\n  field x\n!error missing brace\n")]);
    let bad = unit("", "Bad.java");

    let err = f.model.open_unit(&bad).unwrap_err();
    match err {
        ModelError::OpenFailure { handle, source } => {
            assert_eq!(handle, bad);
            assert!(matches!(source, ParseError::Malformed { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!f.model.is_open(&bad));
    assert!(!f.model.is_open(&bad.child(ElementKind::Type, "Bad")));
    assert_eq!(f.model.unit_stats().len, 0);
    assert_eq!(f.model.buffer_stats().len, 0);
}

#[test]
fn missing_resource_is_an_open_failure() {
    let f = Fixture::new(&[("src/A.java", "class A\n")]);
    let err = f.model.open_unit(&unit("", "Gone.java")).unwrap_err();
    assert!(matches!(
        err,
        ModelError::OpenFailure {
            source: ParseError::Io(_),
            ..
        }
    ));
}

#[test]
fn cancelled_open_leaves_the_store_unchanged() {
    let f = Fixture::with(
        &[("src/A.java", "class A\n")],
        StoreConfig::default(),
        LineFrontEnd::blocking(),
    );
    let a = unit("", "A.java");
    let cancel = CancellationToken::new();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        let err = f.model.open_unit_cancellable(&a, &cancel).unwrap_err();
        assert!(matches!(err, ModelError::Cancelled), "{err:?}");
    });

    assert_eq!(f.front_end.opens(), 1);
    assert!(!f.model.is_open(&a));
    assert_eq!(f.model.unit_stats().len, 0);
    assert_eq!(f.model.buffer_stats().len, 0);

    // Already cancelled: the front end is not consulted at all.
    assert!(matches!(
        f.model.open_unit_cancellable(&a, &cancel),
        Err(ModelError::Cancelled)
    ));
    assert_eq!(f.front_end.opens(), 1);
}

#[test]
fn least_recently_used_units_are_evicted() {
    let config = StoreConfig {
        units: CachePolicy::new(3, 0),
        ..Default::default()
    };
    let f = Fixture::with(
        &[
            ("src/A.java", "class A\n"),
            ("src/B.java", "class B\n"),
            ("src/C.java", "class C\n"),
            ("src/D.java", "class D\n"),
            ("src/E.java", "class E\n"),
        ],
        config,
        LineFrontEnd::new(),
    );
    let [a, b, c, d, e] = ["A", "B", "C", "D", "E"].map(|name| unit("", &format!("{name}.java")));

    for handle in [&a, &b, &c, &d] {
        f.model.open_unit(handle).unwrap();
    }
    assert!(!f.model.is_open(&a));
    assert!(!f.model.is_open(&a.child(ElementKind::Type, "A")));

    f.model.open_unit(&b).unwrap();
    f.model.open_unit(&e).unwrap();
    let resident: Vec<Handle> = f
        .model
        .iter_resident()
        .into_iter()
        .map(|(handle, _)| handle)
        .collect();
    assert_eq!(resident, vec![d, b, e]);
    assert!(!f.model.is_open(&c));
}

#[test]
fn unsaved_buffer_keeps_its_unit_resident() {
    let config = StoreConfig {
        units: CachePolicy::new(1, 0),
        buffers: CachePolicy::new(1, 0),
        ..Default::default()
    };
    let f = Fixture::with(
        &[("src/A.java", "class A\n"), ("src/B.java", "class B\n")],
        config,
        LineFrontEnd::new(),
    );
    let a = unit("", "A.java");
    f.model.open_unit(&a).unwrap();
    let buffer = f.model.buffer(&a).unwrap();
    buffer.append("class Extra\n").unwrap();

    f.model.open_unit(&unit("", "B.java")).unwrap();
    assert!(f.model.is_open(&a));
    assert!(f.model.unit_stats().is_overflowing());
    assert!(matches!(
        f.model.close_unit(&a),
        Err(ModelError::InvalidState { .. })
    ));
    assert_eq!(&*buffer.text(), "class A\nclass Extra\n");

    buffer.mark_saved();
    f.model.shrink();
    assert!(!f.model.is_open(&a));
    assert!(buffer.is_closed());
}

#[test]
fn open_prefers_buffer_contents() {
    let f = Fixture::new(&[("src/A.java", "class A\n")]);
    let a = unit("", "A.java");
    f.model
        .buffer(&a)
        .unwrap()
        .set_contents("class A\nclass Z\n")
        .unwrap();
    let body = f.model.open_unit(&a).unwrap();
    assert_eq!(body.children.len(), 2);
}

#[test]
fn members_are_closed_only_with_their_unit() {
    let f = Fixture::new(&[("src/A.java", "class A\n  method run void\n")]);
    let a = unit("", "A.java");
    let ty = a.child(ElementKind::Type, "A");
    f.model.open_unit(&a).unwrap();

    assert!(matches!(
        f.model.close_unit(&ty),
        Err(ModelError::InvalidState { .. })
    ));
    assert!(f.model.is_open(&a));
    assert_eq!(
        f.model.element_body(&ty).unwrap().children,
        vec![ty.child(ElementKind::Method, "run")]
    );

    f.model.close_unit(&a).unwrap();
    assert!(!f.model.is_open(&a));
    assert!(!f.model.is_open(&ty));

    // Closed members come back by reopening their unit.
    assert!(f.model.element_body(&ty).is_ok());
    assert!(f.model.is_open(&a));
    assert_eq!(f.front_end.opens(), 2);
}

#[test]
fn concurrent_opens_install_a_single_body() {
    let f = Fixture::with(
        &[("src/A.java", "class A\n  method run void\n")],
        StoreConfig::default(),
        LineFrontEnd::gated(2),
    );
    let a = unit("", "A.java");

    let bodies: Vec<_> = std::thread::scope(|scope| {
        let openers: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| f.model.open_unit(&a).unwrap()))
            .collect();
        openers
            .into_iter()
            .map(|opener| opener.join().unwrap())
            .collect()
    });

    // Both parsed before either installed; the second result is discarded.
    assert_eq!(f.front_end.opens(), 2);
    assert!(Arc::ptr_eq(&bodies[0], &bodies[1]));
    assert_eq!(f.model.unit_stats().len, 1);
    assert_eq!(f.model.buffer_stats().len, 1);

    let method = a
        .child(ElementKind::Type, "A")
        .child(ElementKind::Method, "run");
    assert!(f.model.element_body(&method).is_ok());
    assert_eq!(f.front_end.opens(), 2);
}
