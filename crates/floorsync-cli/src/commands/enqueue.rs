use floorsync_core::NewChange;

use crate::cli::ChangeKind;
use crate::commands::common::{open_engine, resolve_payload, Context};
use crate::error::CliError;

pub async fn run_enqueue(
    context: &Context,
    kind: ChangeKind,
    entity: &str,
    entity_id: Option<&str>,
    data: Option<&str>,
) -> Result<(), CliError> {
    let payload = resolve_payload(data)?;
    let engine = open_engine(context, false)?;

    let mut change = NewChange::new(kind.into(), entity, payload);
    if let Some(entity_id) = entity_id {
        change = change.with_entity_id(entity_id);
    }

    let id = engine.add_to_queue(change).await?;
    println!("{id}");
    Ok(())
}
