use crate::sectors::Sector;
use anyhow::Result;

pub fn run() -> Result<()> {
    for sector in Sector::all() {
        println!("{}: {}", sector, sector.instruments().join(", "));
    }
    Ok(())
}
