//! Runtime patch injected into rewritten documents
//!
//! Static rewriting only sees URLs present in the markup. The patch applies
//! the same routing to URLs that appear at runtime: `fetch` and XHR targets
//! go through the proxy, history entries stay under the tunnel prefix.

use super::url::{PROXY_PATH, RELAY_PATH, TUNNEL_PREFIX};

/// Id of the hidden element marking a document as taken over
pub const TAKEOVER_MARKER_ID: &str = "tunnelgate-takeover-marker";

const PATCH_TEMPLATE: &str = r##"<script data-tunnelgate-patch>
(function () {
  var PROXY = "__PROXY__";
  var TUNNEL = "__TUNNEL__";
  var RESERVED = [PROXY, "__RELAY__", TUNNEL];

  function isLocal(url) {
    return typeof url === "string" && url.charAt(0) === "/" &&
      url.charAt(1) !== "/" && url.charAt(1) !== "\\";
  }
  function isReserved(url) {
    return RESERVED.some(function (prefix) {
      if (url.indexOf(prefix) !== 0) return false;
      var next = url.charAt(prefix.length);
      return next === "" || next === "/" || next === "?" || next === "#";
    });
  }
  function toProxy(url) {
    return isLocal(url) && !isReserved(url) ? PROXY + "?path=" + encodeURIComponent(url) : url;
  }
  function toTunnel(url) {
    return isLocal(url) && !isReserved(url) ? TUNNEL + url : url;
  }

  var originalFetch = window.fetch;
  if (originalFetch) {
    window.fetch = function (input, init) {
      return originalFetch.call(window, typeof input === "string" ? toProxy(input) : input, init);
    };
  }

  var originalOpen = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (method, url) {
    var args = Array.prototype.slice.call(arguments);
    args[1] = toProxy(url);
    return originalOpen.apply(this, args);
  };

  ["pushState", "replaceState"].forEach(function (name) {
    var original = history[name];
    history[name] = function (state, title, url) {
      var args = Array.prototype.slice.call(arguments);
      if (args.length > 2) args[2] = toTunnel(url);
      return original.apply(this, args);
    };
  });

  function mark() {
    if (document.getElementById("__MARKER__")) return;
    var marker = document.createElement("div");
    marker.id = "__MARKER__";
    marker.style.display = "none";
    document.body.appendChild(marker);
  }
  if (document.body) {
    mark();
  } else {
    document.addEventListener("DOMContentLoaded", mark);
  }
})();
</script>"##;

/// Render the patch script for the broker's prefixes
pub fn runtime_patch() -> String {
    PATCH_TEMPLATE
        .replace("__PROXY__", PROXY_PATH)
        .replace("__RELAY__", RELAY_PATH)
        .replace("__TUNNEL__", TUNNEL_PREFIX)
        .replace("__MARKER__", TAKEOVER_MARKER_ID)
}

/// Walk a script the way a JS lexer would: string literals, comments and
/// bracket nesting must all close.
#[cfg(test)]
pub(crate) fn assert_script_well_formed(script: &str) {
    let mut stack = Vec::new();
    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                let mut closed = false;
                while let Some(n) = chars.next() {
                    match n {
                        '\\' => {
                            chars.next();
                        }
                        '\n' if c != '`' => panic!("newline inside string literal"),
                        n if n == c => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                assert!(closed, "unterminated string literal");
            }
            '/' if chars.peek() == Some(&'/') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                let mut closed = false;
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        closed = true;
                        break;
                    }
                    prev = n;
                }
                assert!(closed, "unterminated block comment");
            }
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = stack.pop().expect("unbalanced closing bracket");
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                assert_eq!(open, expected, "mismatched bracket");
            }
            _ => {}
        }
    }
    assert!(stack.is_empty(), "unclosed brackets: {:?}", stack);
}
