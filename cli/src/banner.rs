//! Startup banner.

use console::style;

pub fn logo() {
    let banner = r#"
     _   _          _     _   _                      _
    | \ | |   ___  | |_  | | | |   __ _  __      __ | | __
    |  \| |  / _ \ | __| | |_| |  / _` | \ \ /\ / / | |/ /
    | |\  | |  __/ | |_  |  _  | | (_| |  \ V  V /  |   <
    |_| \_|  \___|  \__| |_| |_|  \__,_|   \_/\_/   |_|\_\
"#;

    println!(
        "{}{}",
        style(banner).white().bold(),
        style(format!("    v{}\n", env!("CARGO_PKG_VERSION"))).cyan()
    );
}
