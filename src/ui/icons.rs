//! Emoji used by the terminal UI, with plain-text fallbacks.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

pub static WAVE: Emoji<'_, '_> = Emoji("🌊 ", "[W]");
pub static WAITING: Emoji<'_, '_> = Emoji("⏳ ", "[..]");
pub static INSTALL: Emoji<'_, '_> = Emoji("📦 ", "[+]");
pub static UPGRADE: Emoji<'_, '_> = Emoji("🔄 ", "[~]");
pub static DELETE: Emoji<'_, '_> = Emoji("🗑️  ", "[-]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
