use unsbridge_config::Config;

/// Human-readable one-screen summary of a validated configuration.
pub fn render_config_summary(config: &Config) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "broker        {}:{} (client id '{}')\n",
        config.broker.host, config.broker.port, config.broker.client_id
    ));
    out.push_str(&format!(
        "retained      enabled={} mode={:?} qos={}\n",
        config.retained.enabled,
        config.retained.mode,
        config.retained.qos.level()
    ));
    out.push_str(&format!(
        "lifecycle     group '{}' edge node '{}'\n",
        config.lifecycle.group_id, config.lifecycle.edge_node_id
    ));
    out.push_str(&format!(
        "mapping       {} exact, {} patterns, default {}/{}/{}/{}\n",
        config.mapping.assets.len(),
        config.mapping.patterns.len(),
        config.mapping.default.enterprise,
        config.mapping.default.site,
        config.mapping.default.area,
        config.mapping.default.line,
    ));
    out.push_str(&format!("state         {}\n", config.state.dir.display()));
    out.push_str(&format!(
        "watcher       {} paths, every {}s\n",
        config.watcher.paths.len(),
        config.watcher.poll_interval_secs
    ));
    out.push_str(&format!(
        "repository    {}\n",
        config
            .repository
            .base_url
            .as_deref()
            .unwrap_or("(not configured)")
    ));
    out.push_str(&format!(
        "workers       {} pipeline, queue depth {}\n",
        config.daemon.parallelism, config.daemon.queue_depth
    ));
    out
}

/// Render the /status JSON document for the terminal.
pub fn render_status(body: &serde_json::Value) -> String {
    let mut out = String::new();
    let connected = body["connected"].as_bool().unwrap_or(false);
    out.push_str(&format!(
        "broker        {}\n",
        if connected { "connected" } else { "DISCONNECTED" }
    ));

    if let Some(counters) = body["counters"].as_object() {
        out.push_str("counters\n");
        for (name, value) in counters {
            out.push_str(&format!("  {:<24} {}\n", name, value));
        }
    }
    if let Some(assets) = body["assets"].as_array() {
        out.push_str(&format!("assets        {}\n", assets.len()));
        for asset in assets {
            out.push_str(&format!(
                "  {:<40} {} (last seen {})\n",
                asset["asset_uri"].as_str().unwrap_or("?"),
                asset["state"].as_str().unwrap_or("?"),
                asset["last_seen"].as_str().unwrap_or("?"),
            ));
        }
    }
    if let Some(evictions) = body["evictions"].as_object() {
        let total: u64 = evictions.values().filter_map(|v| v.as_u64()).sum();
        if total > 0 {
            out.push_str(&format!("evictions     {total} total\n"));
        }
    }
    out
}
