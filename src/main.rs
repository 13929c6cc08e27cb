//! Terminal preview for a form definition.
//!
//! Looks for `$DYNAFORM_CONFIG`, `./form.yaml`, `./.dynaform/form.yaml` and
//! the user config dir, in that order.

mod theme;
mod ui;
mod widgets;

use anyhow::Result;

fn main() -> Result<()> {
    if let Err(e) = dynaform::logging::init() {
        eprintln!("logging disabled: {e}");
    }
    ui::run()
}
