//! Registry behaviour across templates and persisted sessions.

use schroot::chroot::Chroot;
use schroot::config::Config;
use schroot::keyfile::Keyfile;
use schroot::types::ConfigError;
use std::path::Path;

fn parse(text: &str) -> Keyfile {
    Keyfile::parse(text.as_bytes()).expect("parse failed")
}

const TEMPLATES: &str = "[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\naliases=unstable\n\n\
                         [unstable-vg]\ntype=lvm-snapshot\ndevice=/dev/vg/unstable\n\
                         mount-location=/mnt/unstable\ngroups=sbuild\n\
                         lvm-snapshot-options=-L,1G\n";

const SESSION: &str = "[unstable-vg-20260802120000-4e2a]\ntype=lvm-snapshot\nactive=true\n\
                       device=/dev/vg/unstable\nmount-location=/mnt/unstable\ngroups=sbuild\n\
                       lvm-snapshot-device=/dev/vg/unstable-vg-20260802120000-4e2a\n\
                       lvm-snapshot-options=-L,1G\n";

#[test]
fn templates_and_sessions_share_one_namespace() {
    let mut config = Config::new();
    config
        .add_keyfile(&parse(TEMPLATES), Path::new("schroot.conf"))
        .expect("templates");
    config
        .add_keyfile(&parse(SESSION), Path::new("session/file"))
        .expect("session");

    assert_eq!(config.chroots().len(), 3);

    let session = config
        .find_by_alias("unstable-vg-20260802120000-4e2a")
        .expect("session resolves");
    assert!(session.active());

    let template = config.find_by_alias("unstable-vg").expect("template");
    assert!(!template.active());

    // A session whose id collides with a loaded name is rejected.
    let err = config
        .add_keyfile(&parse(SESSION), Path::new("session/file"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateName { .. }));
}

#[test]
fn active_session_requires_its_resource_fields() {
    // active=true without the snapshot device must not load.
    let broken = SESSION.replace(
        "lvm-snapshot-device=/dev/vg/unstable-vg-20260802120000-4e2a\n",
        "",
    );
    let mut config = Config::new();
    let err = config
        .add_keyfile(&parse(&broken), Path::new("session/file"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Chroot { .. }));
}

#[test]
fn validate_spans_templates_aliases_and_sessions() {
    let mut config = Config::new();
    config
        .add_keyfile(&parse(TEMPLATES), Path::new("schroot.conf"))
        .expect("templates");
    config
        .add_keyfile(&parse(SESSION), Path::new("session/file"))
        .expect("session");

    let names = vec![
        "sid".to_owned(),
        "unstable".to_owned(),
        "unstable-vg-20260802120000-4e2a".to_owned(),
        "woody".to_owned(),
    ];
    assert_eq!(config.validate(&names), ["woody"]);
}

#[test]
fn obsolete_key_warns_but_chroot_still_loads() {
    let text = "[sid]\nlocation=/srv/chroot/sid\ngroups=sbuild\nrun-session-scripts=true\n";
    let kf = parse(text);

    let chroot = Chroot::from_keyfile(&kf, "sid").expect("loads despite obsolete key");
    // The obsolete key is discarded from the model...
    assert!(!chroot.run_setup_scripts());
    let mut out = Keyfile::new();
    chroot.to_keyfile(&mut out);
    assert!(out.get_raw("sid", "run-session-scripts").is_none());

    // ...but an unmodified write-back of the keyfile preserves it.
    assert_eq!(kf.get_raw("sid", "run-session-scripts"), Some("true"));
    let reparsed = parse(&kf.to_string());
    assert_eq!(reparsed.get_raw("sid", "run-session-scripts"), Some("true"));
}

#[test]
fn print_info_renders_each_selected_chroot() {
    let mut config = Config::new();
    config
        .add_keyfile(&parse(TEMPLATES), Path::new("schroot.conf"))
        .expect("templates");

    let mut out = Vec::new();
    config
        .print_info(
            &["sid".to_owned(), "unstable-vg".to_owned()],
            &mut out,
        )
        .expect("print");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.contains("sid"));
    assert!(text.contains("lvm-snapshot"));
    assert!(text.contains("/dev/vg/unstable"));
}
