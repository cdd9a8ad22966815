use canvas2toml::{
    IdentityKind, ResolvedIdentity, SubmissionRecord, SyncError, document::resolve,
};

fn record(fields: &[(IdentityKind, &str)]) -> SubmissionRecord {
    fields
        .iter()
        .fold(SubmissionRecord::new().with_name("Ada"), |r, (kind, value)| {
            r.with_identity(*kind, *value)
        })
}

#[test]
fn sis_id_beats_everything() {
    let r = record(&[
        (IdentityKind::Id, "9"),
        (IdentityKind::UserId, "42"),
        (IdentityKind::SisLoginId, "ada@x.edu"),
        (IdentityKind::SisId, "s1"),
    ]);
    assert_eq!(resolve(&r).expect("resolve"), ResolvedIdentity::new(IdentityKind::SisId, "s1"));
}

#[test]
fn precedence_falls_through_in_order() {
    let login = record(&[(IdentityKind::UserId, "42"), (IdentityKind::SisLoginId, "ada")]);
    assert_eq!(resolve(&login).expect("login").kind, IdentityKind::SisLoginId);

    let user = record(&[(IdentityKind::Id, "9"), (IdentityKind::UserId, "42")]);
    assert_eq!(resolve(&user).expect("user").kind, IdentityKind::UserId);

    let id = record(&[(IdentityKind::Id, "9")]);
    assert_eq!(resolve(&id).expect("id").kind, IdentityKind::Id);
}

#[test]
fn blank_values_do_not_count() {
    let r = record(&[(IdentityKind::SisId, "   "), (IdentityKind::UserId, " 42 ")]);
    let resolved = resolve(&r).expect("resolve");
    assert_eq!(resolved.kind, IdentityKind::UserId);
    assert_eq!(resolved.value, "42");
}

#[test]
fn no_identity_is_an_error_naming_the_record() {
    let err = resolve(&record(&[(IdentityKind::SisId, "")])).expect_err("unresolvable");
    match err {
        SyncError::UnresolvableIdentity { label } => assert_eq!(label, "Ada"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn remote_keys_use_canvas_sis_syntax() {
    assert_eq!(
        ResolvedIdentity::new(IdentityKind::SisId, "s1").remote_key(),
        "sis_user_id:s1"
    );
    assert_eq!(
        ResolvedIdentity::new(IdentityKind::SisLoginId, "ada").remote_key(),
        "sis_login_id:ada"
    );
    assert_eq!(ResolvedIdentity::new(IdentityKind::Id, "9").remote_key(), "9");
}
