use nova_model::{
    DeltaFlags, DeltaKind, EditScope, ElementKind, ModelError, OwnerId, Payload, Sharing, UseCount,
};
use pretty_assertions::assert_eq;

use super::{summarize, unit, Fixture};

const SOURCE: &str = "class A\n  method run void\n";

fn fixture() -> Fixture {
    Fixture::new(&[("src/com/acme/A.java", SOURCE)])
}

#[test]
fn shared_copy_created_twice_reuses_the_record() {
    let f = fixture();
    let owner = f.model.new_owner();
    let a = unit("com.acme", "A.java");

    let first = f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    let second = f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.own_scope(), Some(EditScope::Shared(owner)));
    assert_eq!(
        f.model.use_count(&first),
        Some(UseCount {
            alive: true,
            count: 2
        })
    );
    assert_eq!(f.front_end.opens(), 1);

    let deltas = f.take_deltas();
    assert_eq!(deltas.len(), 1);
    assert_eq!(
        summarize(&deltas[0]),
        vec![(first.to_string(), DeltaKind::Added, DeltaFlags::NONE)]
    );
}

#[test]
fn nth_discard_closes_the_copy_with_one_delta() {
    let f = fixture();
    let owner = f.model.new_owner();
    let a = unit("com.acme", "A.java");
    let n = 3;

    let mut copy = None;
    for _ in 0..n {
        copy = Some(f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap());
    }
    let copy = copy.unwrap();
    f.take_deltas();

    for _ in 0..n - 1 {
        assert!(!f.model.discard_working_copy(&copy));
        assert!(f.model.is_working_copy(&copy));
    }
    assert!(f.take_deltas().is_empty());

    assert!(f.model.discard_working_copy(&copy));
    assert_eq!(f.model.use_count(&copy), None);
    assert!(!f.model.is_open(&copy));
    assert!(f.model.working_copies(owner).is_empty());

    let deltas = f.take_deltas();
    assert_eq!(deltas.len(), 1);
    assert_eq!(
        summarize(&deltas[0]),
        vec![(copy.to_string(), DeltaKind::Removed, DeltaFlags::NONE)]
    );

    // Further discards of an unregistered copy are no-ops.
    assert!(!f.model.discard_working_copy(&copy));
    assert!(f.take_deltas().is_empty());
}

#[test]
fn destroy_is_idempotent() {
    let f = fixture();
    let owner = f.model.new_owner();
    let a = unit("com.acme", "A.java");
    let copy = f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    f.take_deltas();

    assert!(f.model.destroy_working_copy(&copy));
    assert_eq!(f.take_deltas().len(), 1);
    assert!(!f.model.is_open(&copy));

    assert!(!f.model.destroy_working_copy(&copy));
    assert!(!f.model.discard_working_copy(&copy));
    assert!(f.take_deltas().is_empty());
}

#[test]
fn primary_discard_after_external_deletion_reports_removal() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    let copy = f
        .model
        .create_working_copy(&a, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    assert_eq!(copy.own_scope(), Some(EditScope::Primary));
    assert_eq!(
        summarize(&f.take_deltas()[0]),
        vec![(a.to_string(), DeltaKind::Changed, DeltaFlags::PRIMARY_WORKING_COPY)]
    );

    assert!(f.resources.remove("src/com/acme/A.java"));
    assert!(f.model.discard_working_copy(&copy));

    let deltas = f.take_deltas();
    assert_eq!(deltas.len(), 1);
    assert_eq!(
        summarize(&deltas[0]),
        vec![(a.to_string(), DeltaKind::Removed, DeltaFlags::PRIMARY_WORKING_COPY)]
    );
    assert!(!f.model.is_open(&a));
}

#[test]
fn primary_discard_with_existing_resource_reports_change() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    let copy = f
        .model
        .create_working_copy(&a, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    f.take_deltas();

    assert!(f.model.discard_working_copy(&copy));
    assert_eq!(
        summarize(&f.take_deltas()[0]),
        vec![(a.to_string(), DeltaKind::Changed, DeltaFlags::PRIMARY_WORKING_COPY)]
    );
}

#[test]
fn copy_starts_from_unsaved_original_buffer() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    f.model.buffer(&a).unwrap().append("  field extra int\n").unwrap();

    let copy = f
        .model
        .create_working_copy(&a, f.model.new_owner(), Sharing::Private)
        .unwrap();
    let ty = copy.child(ElementKind::Type, "A");
    assert_eq!(f.model.element_body(&ty).unwrap().children.len(), 2);
    assert!(f.model.buffer(&copy).unwrap().has_unsaved_changes());

    let field = f
        .model
        .element_body(&ty.child(ElementKind::Field, "extra"))
        .unwrap();
    assert!(matches!(&field.payload, Payload::Field { type_name, .. } if type_name == "int"));
}

#[test]
fn private_copies_are_never_shared() {
    let f = fixture();
    let owner = f.model.new_owner();
    let a = unit("com.acme", "A.java");
    let first = f.model.create_working_copy(&a, owner, Sharing::Private).unwrap();
    let second = f.model.create_working_copy(&a, owner, Sharing::Private).unwrap();

    assert_ne!(first, second);
    assert_eq!(f.front_end.opens(), 2);
    assert_eq!(f.model.working_copies(owner).len(), 2);
}

#[test]
fn failed_open_registers_no_copy() {
    let f = Fixture::new(&[("src/Bad.java", "class Bad\n!error unexpected token\n")]);
    let owner = f.model.new_owner();
    let bad = unit("", "Bad.java");

    let err = f
        .model
        .create_working_copy(&bad, owner, Sharing::Shared)
        .unwrap_err();
    assert!(matches!(err, ModelError::OpenFailure { .. }), "{err:?}");
    assert!(f.model.working_copies(owner).is_empty());
    assert_eq!(f.model.buffer_stats().len, 0);
    assert!(f.take_deltas().is_empty());
}

#[test]
fn late_consumers_of_a_destroyed_copy_are_counted() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    let copy = f
        .model
        .create_working_copy(&a, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    assert!(f.model.destroy_working_copy(&copy));
    f.take_deltas();

    f.model.become_working_copy(&copy).unwrap();
    assert_eq!(
        f.model.use_count(&copy),
        Some(UseCount {
            alive: false,
            count: 2
        })
    );
    assert!(!f.model.is_working_copy(&copy));
    assert_eq!(f.front_end.opens(), 1);

    assert!(!f.model.discard_working_copy(&copy));
    assert!(!f.model.discard_working_copy(&copy));
    assert_eq!(f.model.use_count(&copy), None);
    assert!(f.take_deltas().is_empty());
}

#[test]
fn shutdown_destroys_every_copy_of_an_owner_in_one_batch() {
    let f = fixture();
    let owner = f.model.new_owner();
    let other = f.model.new_owner();
    let a = unit("com.acme", "A.java");
    f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    f.model.create_working_copy(&a, owner, Sharing::Private).unwrap();
    let kept = f.model.create_working_copy(&a, other, Sharing::Shared).unwrap();
    f.take_deltas();

    assert_eq!(f.model.shutdown(owner), 2);
    let deltas = f.take_deltas();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].affected().len(), 2);
    assert_eq!(f.model.working_copies(other), vec![kept]);
}

#[test]
fn remove_shared_ignores_the_use_count() {
    let f = fixture();
    let owner = f.model.new_owner();
    let a = unit("com.acme", "A.java");
    let copy = f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    f.take_deltas();

    assert!(f.model.remove_shared_working_copy(&a, owner));
    assert!(!f.model.is_working_copy(&copy));
    assert_eq!(
        summarize(&f.take_deltas()[0]),
        vec![(copy.to_string(), DeltaKind::Removed, DeltaFlags::NONE)]
    );
    assert!(!f.model.remove_shared_working_copy(&a, owner));
}

#[test]
fn commit_writes_the_buffer_and_invalidates_the_original() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    f.model.open_unit(&a).unwrap();
    let copy = f
        .model
        .create_working_copy(&a, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    let buffer = f.model.buffer(&copy).unwrap();
    buffer.set_contents("class B\n").unwrap();
    f.take_deltas();

    f.model.commit_working_copy(&copy).unwrap();

    assert_eq!(
        f.resources.contents("src/com/acme/A.java").as_deref(),
        Some("class B\n")
    );
    assert!(!buffer.has_unsaved_changes());
    assert!(!f.model.is_open(&a));
    assert_eq!(
        summarize(&f.take_deltas()[0]),
        vec![(
            a.to_string(),
            DeltaKind::Changed,
            DeltaFlags::CONTENT | DeltaFlags::PRIMARY_RESOURCE
        )]
    );

    let reopened = f.model.open_unit(&a).unwrap();
    assert_eq!(reopened.children, vec![a.child(ElementKind::Type, "B")]);
}

#[test]
fn reconcile_reparses_the_buffer() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    let copy = f
        .model
        .create_working_copy(&a, f.model.new_owner(), Sharing::Shared)
        .unwrap();
    f.model
        .buffer(&copy)
        .unwrap()
        .append("class Helper\n")
        .unwrap();
    f.take_deltas();

    let body = f.model.reconcile(&copy).unwrap();
    assert_eq!(body.children.len(), 2);
    assert!(f
        .model
        .element_body(&copy.child(ElementKind::Type, "Helper"))
        .is_ok());
    assert_eq!(
        summarize(&f.take_deltas()[0]),
        vec![(
            copy.to_string(),
            DeltaKind::Changed,
            DeltaFlags::CONTENT | DeltaFlags::CHILDREN | DeltaFlags::RECONCILED
        )]
    );
}

#[test]
fn working_copy_buffers_survive_buffer_pressure() {
    let config = nova_model::StoreConfig {
        buffers: nova_model::CachePolicy::new(1, 0),
        ..Default::default()
    };
    let f = Fixture::with(
        &[
            ("src/A.java", "class A\n"),
            ("src/B.java", "class B\n"),
            ("src/C.java", "class C\n"),
        ],
        config,
        nova_model::testing::LineFrontEnd::new(),
    );
    let copy = f
        .model
        .create_working_copy(&unit("", "A.java"), f.model.new_owner(), Sharing::Shared)
        .unwrap();
    f.model.open_unit(&unit("", "B.java")).unwrap();
    f.model.open_unit(&unit("", "C.java")).unwrap();

    assert!(f.model.is_open(&copy));
    assert!(!f.model.buffer(&copy).unwrap().is_closed());
}

#[test]
fn destroy_drops_the_original_body_once_its_resource_is_gone() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    f.model.open_unit(&a).unwrap();
    let copy = f
        .model
        .create_working_copy(&a, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    assert!(f.resources.remove("src/com/acme/A.java"));

    assert!(f.model.destroy_working_copy(&copy));
    assert!(!f.model.is_open(&copy));
    assert!(!f.model.is_open(&a));
}

#[test]
fn discard_leaves_the_original_body_alone() {
    let f = fixture();
    let a = unit("com.acme", "A.java");
    f.model.open_unit(&a).unwrap();
    let copy = f
        .model
        .create_working_copy(&a, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    assert!(f.resources.remove("src/com/acme/A.java"));

    assert!(f.model.discard_working_copy(&copy));
    assert!(!f.model.is_open(&copy));
    assert!(f.model.is_open(&a));
}

#[test]
fn reopened_copy_starts_from_a_fresh_buffer() {
    let f = fixture();
    let owner = f.model.new_owner();
    let a = unit("com.acme", "A.java");
    let copy = f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    let first = f.model.buffer(&copy).unwrap();
    first.append("class Scratch\n").unwrap();
    assert!(f.model.discard_working_copy(&copy));
    assert!(first.is_closed());

    let again = f.model.create_working_copy(&a, owner, Sharing::Shared).unwrap();
    assert_eq!(again, copy);
    let second = f.model.buffer(&copy).unwrap();
    assert!(!second.is_closed());
    assert_eq!(&*second.text(), SOURCE);
    assert_eq!(f.model.open_unit(&copy).unwrap().children.len(), 1);
}

#[test]
fn committing_a_new_unit_adds_its_package() {
    let f = fixture();
    let root = nova_model::Handle::root("src");
    f.model.open_unit(&root).unwrap();
    let fresh = super::package("org.example");
    let main = unit("org.example", "Main.java");
    let copy = f
        .model
        .create_working_copy(&main, OwnerId::PRIMARY, Sharing::Shared)
        .unwrap();
    f.model
        .buffer(&copy)
        .unwrap()
        .set_contents("class Main\n")
        .unwrap();
    f.take_deltas();

    f.model.commit_working_copy(&copy).unwrap();

    assert_eq!(
        summarize(&f.take_deltas()[0]),
        vec![(fresh.to_string(), DeltaKind::Added, DeltaFlags::NONE)]
    );
    assert!(f.model.open_unit(&root).unwrap().children.contains(&fresh));
}
