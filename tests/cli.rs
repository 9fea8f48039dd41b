use assert_cmd::Command;
use assert_fs::prelude::*;
use clap::Parser;
use predicates::prelude::*;

use ccsync::cli::{Cli, Commands};
use ccsync::core::etag::{dummy_etag, etag_path};

fn ccs(dir: &assert_fs::TempDir) -> Command
{
    let mut cmd = Command::cargo_bin("ccs").expect("binary");
    cmd.current_dir(dir.path())
        .env_remove("CCSYNC_NODE")
        .env_remove("CCSYNC_APPLICATION_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn put_flags_parse()
{
    let cli = Cli::parse_from([
        "ccs",
        "put",
        "widget/Cart/widget.less",
        "--update-instances",
        "--no-instance-config",
    ]);
    match cli.command
    {
        Commands::Put(args) =>
        {
            assert!(args.options.update_instances);
            assert!(args.options.no_instance_config);
        }
        _ => panic!("expected Put command"),
    }
}

#[test]
fn help_lists_commands()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    ccs(&tmp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("grab"))
        .stdout(predicate::str::contains("transfer-all"));
}

#[test]
fn completions_to_stdout()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    ccs(&tmp)
        .args(["completions", "bash", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ccs"));
}

#[test]
fn init_writes_config_once()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    ccs(&tmp)
        .arg("init")
        .assert()
        .success();
    tmp.child("ccsync.toml")
        .assert(predicate::str::contains("token_refresh_secs = 15"));

    ccs(&tmp)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    ccs(&tmp)
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn put_without_a_node_is_a_configuration_error()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    tmp.child("widget")
        .create_dir_all()
        .unwrap();
    ccs(&tmp)
        .args(["put-all", "widget"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no node"));
}

#[test]
fn transfer_needs_an_explicit_destination()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    ccs(&tmp)
        .args(["transfer-all", "."])
        .assert()
        .code(2);
}

#[test]
fn etag_is_decoded()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let rel = std::path::Path::new("widget/Cart/display.template");
    tmp.child(rel)
        .write_str("<div/>")
        .unwrap();
    let etag_rel = etag_path(rel);
    tmp.child(&etag_rel)
        .write_str(&dummy_etag(&etag_rel))
        .unwrap();

    ccs(&tmp)
        .args(["etag", "widget/Cart/display.template"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hash\": \"dummy\""));
}

#[test]
fn etag_outside_a_tree_fails()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    tmp.child("loose.txt")
        .write_str("x")
        .unwrap();
    ccs(&tmp)
        .args(["etag", "loose.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run grab first"));
}
