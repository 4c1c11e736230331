use anyhow::Result;
use std::process;

use morsel_core::models::EntryDraft;
use morsel_core::service::MorselService;

/// Print the mutation outcome the way the notification surface would show it.
fn report(service: &MorselService, ok: bool, json: bool) -> Result<()> {
    let notice = service.notice().unwrap_or_default();
    if json {
        println!("{}", serde_json::json!({ "ok": ok, "notice": notice }));
    } else if ok {
        println!("{notice}");
    } else {
        eprintln!("{notice}");
    }
    if !ok {
        process::exit(1);
    }
    Ok(())
}

pub(crate) fn cmd_add(service: &MorselService, draft: &EntryDraft, json: bool) -> Result<()> {
    let ok = service.add(draft);
    report(service, ok, json)
}

pub(crate) fn cmd_delete(service: &MorselService, entry_id: &str, json: bool) -> Result<()> {
    let ok = service.delete(entry_id);
    report(service, ok, json)
}
