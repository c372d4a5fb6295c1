use anyhow::{anyhow, bail, Result};
use dialoguer::{theme::ColorfulTheme, BasicHistory, Input};
use junkpool::{
    catalog::Schema,
    common::{PageID, Permission, TransactionID},
    concurrency::TransactionStatus,
    config::Config,
    instance::Instance,
    lock::LockHolders,
};
use prettytable::{Cell, Row, Table};
use tracing_subscriber::EnvFilter;

const HELP: &str = r#"commands:
  create <table>
  begin
  read <txn> <table> <page>
  write <txn> <table> <page> <offset> <byte>
  new <txn> <table>
  commit <txn>
  abort <txn>
  status
  exit | quit"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();
    if let Some(data_dir) = args.get(1) {
        config = Config::new(data_dir);
    }
    if let Some(num_pages) = args.get(2) {
        config = config.with_num_pages(num_pages.parse()?);
    }
    let instance = Instance::new(config, false)?;

    println!("Welcome to junkpool!");
    println!("Type \"help\" for commands, \"exit\" or \"quit\" to exit.");
    let mut history = BasicHistory::new().max_entries(100).no_duplicates(true);
    loop {
        let Ok(cmd) = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt("junkpool")
            .history_with(&mut history)
            .interact_text()
        else {
            continue;
        };
        let cmd = cmd.trim();
        if cmd == "exit" || cmd == "quit" {
            break;
        }
        match execute(&instance, cmd) {
            Ok(output) => println!("{}", output),
            Err(e) => println!("error: {}", e),
        }
    }
    instance.shutdown()?;
    println!("Bye!");
    Ok(())
}

fn execute(instance: &Instance, cmd: &str) -> Result<String> {
    let words = cmd.split_whitespace().collect::<Vec<_>>();
    let output = match words.as_slice() {
        [] => String::new(),
        ["help"] => HELP.to_string(),
        ["create", name] => {
            let table_id = instance.create_table(name, Schema::default())?;
            format!("created table {} ({})", name, table_id)
        }
        ["begin"] => instance.begin()?.to_string(),
        ["read", txn, table, page_number] => {
            let txn_id = running_txn(instance, txn)?;
            let page_id = PageID::new(instance.table_id(table)?, page_number.parse()?);
            check_not_blocked(instance, txn_id, page_id, Permission::ReadOnly)?;
            let page = instance
                .buffer_pool
                .get_page(txn_id, page_id, Permission::ReadOnly)?;
            let page = page.read().map_err(|_| anyhow!("lock error"))?;
            hex_preview(page.read_at(0, 32))
        }
        ["write", txn, table, page_number, offset, byte] => {
            let txn_id = running_txn(instance, txn)?;
            let page_id = PageID::new(instance.table_id(table)?, page_number.parse()?);
            let offset: usize = offset.parse()?;
            let byte: u8 = byte.parse()?;
            check_not_blocked(instance, txn_id, page_id, Permission::ReadWrite)?;
            let page = instance
                .buffer_pool
                .get_page(txn_id, page_id, Permission::ReadWrite)?;
            let mut page = page.write().map_err(|_| anyhow!("lock error"))?;
            if offset >= page.data().len() {
                bail!("offset {} is outside the page", offset);
            }
            page.write_at(offset, &[byte]);
            format!("{}[{}] = {}", page_id, offset, byte)
        }
        ["new", txn, table] => {
            let txn_id = running_txn(instance, txn)?;
            let (page_id, _) = instance
                .buffer_pool
                .new_page(txn_id, instance.table_id(table)?)?;
            page_id.to_string()
        }
        ["commit", txn] => {
            let txn_id = parse_txn(txn)?;
            instance.commit(txn_id)?;
            format!("committed {}", txn_id)
        }
        ["abort", txn] => {
            let txn_id = parse_txn(txn)?;
            instance.rollback(txn_id)?;
            format!("aborted {}", txn_id)
        }
        ["status"] => status(instance)?,
        _ => bail!("unknown command {:?}, type \"help\"", cmd),
    };
    Ok(output)
}

fn parse_txn(word: &str) -> Result<TransactionID> {
    let digits = word.strip_prefix('T').unwrap_or(word);
    Ok(TransactionID(digits.parse()?))
}

/// Only ids handed out by `begin` and not yet finished may touch pages.
fn running_txn(instance: &Instance, word: &str) -> Result<TransactionID> {
    let txn_id = parse_txn(word)?;
    match instance.transaction_manager.status(txn_id)? {
        Some(TransactionStatus::Running) => Ok(txn_id),
        Some(status) => bail!("{} is {:?}", txn_id, status),
        None => bail!("unknown transaction {}", txn_id),
    }
}

/// The shell runs on a single thread, so a request that would wait on
/// another transaction is refused instead of hanging the prompt.
fn check_not_blocked(
    instance: &Instance,
    txn_id: TransactionID,
    page_id: PageID,
    permission: Permission,
) -> Result<()> {
    let blocked = match instance.lock_manager.holders(page_id)? {
        None => false,
        Some(LockHolders::Exclusive(holder)) => holder != txn_id,
        Some(LockHolders::Shared(holders)) => {
            permission.is_exclusive() && holders.iter().any(|&holder| holder != txn_id)
        }
    };
    if blocked {
        bail!("{} would wait for a lock on {}", txn_id, page_id);
    }
    Ok(())
}

fn hex_preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn status(instance: &Instance) -> Result<String> {
    let mut table_view = Table::new();
    table_view.set_titles(Row::new(vec![
        Cell::new("page"),
        Cell::new("dirtied by"),
        Cell::new("lock"),
    ]));
    for (page_id, dirtied_by) in instance.buffer_pool.cached_pages()? {
        let dirtied_by = dirtied_by.map(|t| t.to_string()).unwrap_or_default();
        let lock = match instance.lock_manager.holders(page_id)? {
            None => String::new(),
            Some(LockHolders::Exclusive(holder)) => format!("X {}", holder),
            Some(LockHolders::Shared(holders)) => format!("S {}", join(&holders)),
        };
        table_view.add_row(Row::new(vec![
            Cell::new(&page_id.to_string()),
            Cell::new(&dirtied_by),
            Cell::new(&lock),
        ]));
    }
    let mut txn_view = Table::new();
    txn_view.set_titles(Row::new(vec![
        Cell::new("txn"),
        Cell::new("touched"),
        Cell::new("locked"),
        Cell::new("waiting on"),
    ]));
    for txn_id in instance.transaction_manager.running()? {
        txn_view.add_row(Row::new(vec![
            Cell::new(&txn_id.to_string()),
            Cell::new(&join(&instance.buffer_pool.touched_pages(txn_id)?)),
            Cell::new(&join(&instance.lock_manager.locked_pages(txn_id)?)),
            Cell::new(&join(&instance.lock_manager.waiting_on(txn_id)?)),
        ]));
    }
    Ok(format!(
        "{}cached {}/{} pages\n{}",
        table_view,
        instance.buffer_pool.len(),
        instance.buffer_pool.capacity(),
        txn_view
    ))
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
