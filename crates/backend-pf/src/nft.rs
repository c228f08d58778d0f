//! nftables plumbing for the `PacketFilter` backend. Grounded on
//! `proxyvpn-firewall`'s `nft.rs`: a native `nftnl`/`mnl` batch path is
//! tried first for structural bootstrap (table, base chain, jump, empty
//! sets); per-UID enforcement deltas are then diffed into two named sets
//! (`blocked_v4`/`blocked_v6` for the internet dimension, `blocked_lan_v4`/
//! `blocked_lan_v6` for the LAN dimension) via `nft add element` / `nft
//! delete element`, the idiomatic way nftables wrappers apply incremental
//! membership changes without tracking individual rule handles.

use std::ffi::CString;

use anyhow::{Context, Result, anyhow};
use nftnl::{Batch, Chain, FinalizedBatch, Hook, MsgType, Policy, ProtoFamily, Rule, Table, nft_expr};

use netshield_util::CommandRunner;

pub const TABLE: &str = "netshield";
pub const CHAIN_OUTPUT: &str = "output";
pub const CHAIN_BLOCK: &str = "block";
pub const SET_BLOCKED: &str = "blocked_uids";
pub const SET_BLOCKED_LAN: &str = "blocked_uids_lan";

/// Private destination prefixes LAN blocking matches against (spec §4.3).
pub const LAN_PREFIXES_V4: &[&str] = &["192.168.0.0/16", "10.0.0.0/8", "172.16.0.0/12"];
pub const LAN_PREFIXES_V6: &[&str] = &["fc00::/7", "fe80::/10"];

pub fn find_nft_binary() -> bool {
    netshield_util::find_in_path("nft").is_some()
}

/// Creates the table and the base `output` chain (hooked, policy accept)
/// plus the `block` regular chain it jumps to — the structural skeleton
/// only. Idempotent: deletes any stale table of the same name first. Does
/// NOT create the membership sets or their drop rules: the native `nftnl`
/// batch path above has no demonstrated set-creation support in this
/// workspace, so that step always runs through `bootstrap_sets_and_rules`
/// regardless of whether the structural bootstrap went native or shell.
pub fn bootstrap_native() -> Result<()> {
    let table_c = CString::new(TABLE).unwrap();
    let table = Table::new(table_c.as_c_str(), ProtoFamily::Inet);

    let _ = delete_table_native();

    let mut batch = Batch::new();
    batch.add(&table, MsgType::Add);

    let output_c = CString::new(CHAIN_OUTPUT).unwrap();
    let mut output = Chain::new(output_c.as_c_str(), &table);
    output.set_hook(Hook::Out, 0);
    output.set_policy(Policy::Accept);
    batch.add(&output, MsgType::Add);

    let block_c = CString::new(CHAIN_BLOCK).unwrap();
    let block = Chain::new(block_c.as_c_str(), &table);
    batch.add(&block, MsgType::Add);

    let mut jump = Rule::new(&output);
    jump.add_expr(&nft_expr!(verdict jump "block"));
    batch.add(&jump, MsgType::Add);

    let finalized = batch.finalize();
    send_and_process(&finalized).context("native nft bootstrap failed")
}

/// Shell-`nft` equivalent of `bootstrap_native`'s structural skeleton —
/// table, both chains, the jump rule — used only when the native netlink
/// path fails but a usable `nft` binary is present.
pub fn bootstrap_structural_cmd(runner: &CommandRunner) -> Result<()> {
    let _ = runner.run_capture_allow_fail("nft", &["delete", "table", "inet", TABLE]);
    runner.run("nft", &["add", "table", "inet", TABLE])?;
    runner.run(
        "nft",
        &[
            "add", "chain", "inet", TABLE, CHAIN_OUTPUT, "{", "type", "filter", "hook", "output",
            "priority", "0", ";", "policy", "accept", ";", "}",
        ],
    )?;
    runner.run("nft", &["add", "chain", "inet", TABLE, CHAIN_BLOCK])?;
    runner.run("nft", &["add", "rule", "inet", TABLE, CHAIN_OUTPUT, "jump", CHAIN_BLOCK])?;
    Ok(())
}

/// Creates the two membership sets and the skuid/LAN-prefix drop rules
/// that reference them. Always run after the structural bootstrap
/// succeeds, via the shell `nft` binary, regardless of whether the table
/// and chains themselves were created natively or via shell — the native
/// batch path has no set-creation step, so without this the sets would
/// never exist on hosts where native netlink bootstrap succeeds, and every
/// subsequent `add element`/`delete element` diff apply would fail.
pub fn bootstrap_sets_and_rules(runner: &CommandRunner) -> Result<()> {
    runner.run(
        "nft",
        &["add", "set", "inet", TABLE, SET_BLOCKED, "{", "type", "mark", ";", "}"],
    )?;
    runner.run(
        "nft",
        &["add", "set", "inet", TABLE, SET_BLOCKED_LAN, "{", "type", "mark", ";", "}"],
    )?;
    runner.run(
        "nft",
        &["add", "rule", "inet", TABLE, CHAIN_BLOCK, "meta", "skuid", "@", SET_BLOCKED, "drop"],
    )?;
    for prefix in LAN_PREFIXES_V4 {
        runner.run(
            "nft",
            &[
                "add", "rule", "inet", TABLE, CHAIN_BLOCK, "ip", "daddr", prefix, "meta", "skuid",
                "@", SET_BLOCKED_LAN, "drop",
            ],
        )?;
    }
    for prefix in LAN_PREFIXES_V6 {
        runner.run(
            "nft",
            &[
                "add", "rule", "inet", TABLE, CHAIN_BLOCK, "ip6", "daddr", prefix, "meta", "skuid",
                "@", SET_BLOCKED_LAN, "drop",
            ],
        )?;
    }
    Ok(())
}

pub fn add_element(runner: &CommandRunner, set: &str, uid: i32) -> Result<()> {
    runner.run("nft", &["add", "element", "inet", TABLE, set, "{", &uid.to_string(), "}"])
}

pub fn delete_element(runner: &CommandRunner, set: &str, uid: i32) -> Result<()> {
    runner.run("nft", &["delete", "element", "inet", TABLE, set, "{", &uid.to_string(), "}"])
}

pub fn delete_table_native() -> Result<()> {
    let table_c = CString::new(TABLE).unwrap();
    let table = Table::new(table_c.as_c_str(), ProtoFamily::Inet);
    let mut batch = Batch::new();
    batch.add(&table, MsgType::Del);
    let finalized = batch.finalize();
    send_and_process(&finalized)
}

pub fn delete_table_cmd(runner: &CommandRunner) -> Result<()> {
    let _ = runner.run_capture_allow_fail("nft", &["delete", "table", "inet", TABLE]);
    Ok(())
}

fn send_and_process(batch: &FinalizedBatch) -> Result<()> {
    let socket = mnl::Socket::new(mnl::Bus::Netfilter).context("open netlink socket")?;
    let portid = socket.portid();
    socket.send_all(batch).context("send nft batch")?;
    let mut buffer = vec![0u8; nftnl::nft_nlmsg_maxsize() as usize];
    let mut expected_seqs = batch.sequence_numbers();
    while !expected_seqs.is_empty() {
        let len = socket.recv(&mut buffer[..]).context("recv nft ack")?;
        let expected_seq = expected_seqs
            .next()
            .ok_or_else(|| anyhow!("unexpected nft ack"))?;
        mnl::cb_run(&buffer[..len], expected_seq, portid).context("process nft ack")?;
    }
    Ok(())
}
