//! `pf_bb_config` INI rendering

use crds::{ACC100BBDevConfig, BBDevConfig, N3000BBDevConfig, QueueGroupConfig, UplinkDownlink};
use std::fmt::Write;

/// Renders the INI file `pf_bb_config` reads. `None` if no device section is set.
pub fn render_ini(config: &BBDevConfig) -> Option<String> {
    if let Some(n3000) = &config.n3000 {
        return Some(render_n3000(n3000));
    }
    config.acc100.as_ref().map(render_acc100)
}

fn mode(out: &mut String, pf_mode: bool) {
    let _ = writeln!(out, "[MODE]\npf_mode_en = {}\n", u8::from(pf_mode));
}

fn render_n3000(config: &N3000BBDevConfig) -> String {
    let mut out = String::new();
    mode(&mut out, config.pf_mode);
    link(&mut out, "UL", &config.uplink);
    link(&mut out, "DL", &config.downlink);
    let _ = writeln!(out, "[FLR]\nflr_time_out = {}", config.flr_timeout);
    out
}

fn link(out: &mut String, section: &str, link: &UplinkDownlink) {
    let vfqmap = link
        .queues
        .as_array()
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let _ = writeln!(
        out,
        "[{section}]\nbandwidth = {}\nload_balance = {}\nvfqmap = {vfqmap}\n",
        link.bandwidth, link.load_balance
    );
}

fn render_acc100(config: &ACC100BBDevConfig) -> String {
    let mut out = String::new();
    mode(&mut out, config.pf_mode);
    let _ = writeln!(out, "[VFBUNDLES]\nnum_vf_bundles = {}\n", config.num_vf_bundles);
    let _ = writeln!(out, "[MAXQSIZE]\nmax_queue_size = {}\n", config.max_queue_size);
    queue_group(&mut out, "QUL4G", &config.uplink_4g);
    queue_group(&mut out, "QDL4G", &config.downlink_4g);
    queue_group(&mut out, "QUL5G", &config.uplink_5g);
    queue_group(&mut out, "QDL5G", &config.downlink_5g);
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}

fn queue_group(out: &mut String, section: &str, group: &QueueGroupConfig) {
    let _ = writeln!(
        out,
        "[{section}]\nnum_qgroups = {}\nnum_aqs_per_groups = {}\naq_depth_log2 = {}\n",
        group.num_queue_groups, group.num_aqs_per_groups, group.aq_depth_log2
    );
}
