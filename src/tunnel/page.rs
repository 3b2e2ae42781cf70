//! Bootstrap document served for tunnel navigation

use crate::config::TunnelConfig;
use crate::rewrite::{PROXY_PATH, RELAY_PATH, TAKEOVER_MARKER_ID};

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Connecting...</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 3rem; color: #222; }
  #tunnelgate-error { display: none; color: #b00020; }
  #tunnelgate-error button { margin-top: 1rem; }
</style>
</head>
<body>
<p id="tunnelgate-status">Waiting for the agent...</p>
<div id="tunnelgate-error">
  <p id="tunnelgate-error-message"></p>
  <button type="button" onclick="location.reload()">Retry</button>
</div>
<script>
(function () {
  var RELAY = "__RELAY__";
  var PROXY = "__PROXY__";
  var PATH = __PATH__;
  var INTERVAL_MS = __INTERVAL__;
  var MAX_ATTEMPTS = __ATTEMPTS__;

  if (document.getElementById("__MARKER__")) return;

  function sleep(ms) {
    return new Promise(function (resolve) { setTimeout(resolve, ms); });
  }

  function fail(message) {
    document.getElementById("tunnelgate-status").style.display = "none";
    document.getElementById("tunnelgate-error-message").textContent = message;
    document.getElementById("tunnelgate-error").style.display = "block";
  }

  function header(result, name) {
    var headers = result.headers || {};
    for (var key in headers) {
      if (key.toLowerCase() === name && typeof headers[key] === "string") return headers[key];
    }
    return null;
  }

  function show(result) {
    var target = header(result, "location");
    if (result.status >= 300 && result.status < 400 && target) {
      location.replace(target);
      return;
    }
    if (result.isBase64) {
      location.replace(PROXY + "?path=" + encodeURIComponent(PATH));
      return;
    }
    document.open();
    document.write(result.body);
    document.close();
  }

  async function run() {
    var queued = await fetch(RELAY + "?action=queue", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ method: "GET", path: PATH, headers: {} })
    });
    if (!queued.ok) throw new Error("Queue failed: " + queued.status);
    var job = await queued.json();
    if (!job.success) throw new Error("Failed to queue job");

    var status = document.getElementById("tunnelgate-status");
    var url = RELAY + "?action=result&rewrite=1&id=" + encodeURIComponent(job.id);
    for (var attempt = 0; attempt < MAX_ATTEMPTS; attempt++) {
      await sleep(INTERVAL_MS);
      status.textContent = "Still waiting... (" + (attempt + 1) + "/" + MAX_ATTEMPTS + ")";
      var polled = await fetch(url);
      if (!polled.ok) throw new Error("Result failed: " + polled.status);
      var data = await polled.json();
      if (data.completed) {
        show(data.result);
        return;
      }
    }
    throw new Error("Request timed out. Is the agent running and connected to this broker?");
  }

  run().catch(function (err) { fail(err && err.message ? err.message : String(err)); });
})();
</script>
</body>
</html>
"#;

/// Render the bootstrap page for one service path
pub fn bootstrap_page(path: &str, config: &TunnelConfig) -> String {
    PAGE_TEMPLATE
        .replace("__RELAY__", RELAY_PATH)
        .replace("__PROXY__", PROXY_PATH)
        .replace("__MARKER__", TAKEOVER_MARKER_ID)
        .replace("__INTERVAL__", &config.poll_interval_ms.to_string())
        .replace("__ATTEMPTS__", &config.max_attempts.to_string())
        .replace("__PATH__", &script_string(path))
}

/// JSON string literal that cannot close the surrounding `<script>`
fn script_string(value: &str) -> String {
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace("</", "<\\/")
        .replace("<!--", "<\\!--")
}
