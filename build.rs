use vergen::{BuildBuilder, Emitter, RustcBuilder};
use vergen_git2::Git2Builder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let build = BuildBuilder::default().build_date(true).build()?;
    let rustc = RustcBuilder::default().semver(true).host_triple(true).build()?;

    let mut emitter = Emitter::default();
    emitter.add_instructions(&build)?.add_instructions(&rustc)?;

    // Source tarballs have no repository to describe.
    match Git2Builder::default()
        .sha(true)
        .describe(true, true, None)
        .build()
    {
        Ok(git2) => {
            emitter.add_instructions(&git2)?;
        }
        Err(_) => {
            println!("cargo:rustc-env=VERGEN_GIT_SHA=unknown");
            println!("cargo:rustc-env=VERGEN_GIT_DESCRIBE=unknown");
        }
    }

    emitter.emit()?;
    Ok(())
}
