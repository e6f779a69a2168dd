use anyhow::Result;

fn main() -> Result<()> {
    // re-run the build if this script is changed (or deleted!),
    // even if the rust code is completely unchanged.
    println!("cargo:rerun-if-changed=build.rs");
    cfg_aliases::cfg_aliases! {
        kvm: { all(target_os = "linux", feature = "kvm") },
    }
    Ok(())
}
