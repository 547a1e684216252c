use regex::Regex;
use std::process::Command;

fn main() {
    let build = describe_git().unwrap_or_else(|_| format!("{} (Cargo)", env!("CARGO_PKG_VERSION")));
    println!("cargo:rustc-env=ANCHOR_BUILD={}", build.trim());
    println!("cargo:rerun-if-changed=.git/HEAD");
}

// turns "v0.3.0-12-gabcdef0" into "0.3.0.r12.abcdef0"
fn describe_git() -> Result<String, Box<dyn std::error::Error>> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--abbrev=7"])
        .output()?;
    if !output.status.success() {
        return Err("git describe failed".into());
    }

    let re = Regex::new(r"v([0-9.]+)-([0-9]+)-g([a-f0-9]+)")?;
    let described = String::from_utf8(output.stdout)?;
    Ok(re.replace_all(&described, "${1}.r${2}.${3}").into_owned())
}
