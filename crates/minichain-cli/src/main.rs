use anyhow::Result;
use clap::{Parser, Subcommand};
use minichain_core::{Chain, MineOutcome, SystemClock, Transaction};
use minichain_store::{transactions_involving, FileStore};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "minichain-cli")]
#[command(about = "Interactive front end for the minimal proof-of-work ledger")]
struct Cli {
    /// Leading zero characters required of each mined block hash
    #[arg(long, default_value_t = 3)]
    difficulty: u32,

    /// Directory holding the per-block JSON files
    #[arg(long, default_value = "./data")]
    data_dir: String,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive ledger session (the default)
    Repl,
    /// Scan persisted blocks for transactions mentioning a name
    Wallet {
        #[arg(long)]
        name: String,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let store = FileStore::open(&cli.data_dir)?;
    match cli.cmd {
        Some(Command::Wallet { name }) => wallet(&store, &name),
        Some(Command::Repl) | None => repl(cli.difficulty, store),
    }
}

fn repl(difficulty: u32, store: FileStore) -> Result<()> {
    // Every session starts a fresh chain, so stale block files go first.
    store.clear()?;
    let mut chain =
        Chain::with_collaborators(difficulty, Arc::new(SystemClock), Arc::new(store.clone()))?;

    show_commands();
    let stdin = io::stdin();
    loop {
        let Some(line) = prompt(&stdin, "\nenter command: ")? else {
            break;
        };
        match line.as_str() {
            "buy" => buy(&stdin, &mut chain)?,
            "mine" => {
                println!(
                    "mining new block with difficulty of {} ...",
                    chain.difficulty()
                );
                match chain.mine()? {
                    MineOutcome::Mined { index } => {
                        println!("Mining successful! block {index} added to chain")
                    }
                    MineOutcome::EmptyPool => println!("no pending transactions, nothing to mine"),
                }
            }
            "show" => show(&chain),
            "wallet" => {
                if let Some(name) = prompt(&stdin, "\nEnter a name: ")? {
                    wallet(&store, &name)?;
                }
            }
            "help" => show_commands(),
            "exit" => break,
            "" => {}
            _ => println!("invalid command"),
        }
    }
    Ok(())
}

fn buy(stdin: &io::Stdin, chain: &mut Chain) -> Result<()> {
    println!("\nFormat for transactions, separated with spaces: from(str) to(str) amount(int)");
    println!("eg: John Bob 5");
    let Some(line) = prompt(stdin, "enter your transaction: ")? else {
        return Ok(());
    };
    let Some(tx) = parse_transaction(&line) else {
        println!("invalid transaction");
        return Ok(());
    };
    println!(
        "Your transaction:\n  from: {}, to: {}, amount: {}",
        tx.from, tx.to, tx.amount
    );
    match prompt(stdin, "\nConfirm transaction (y/n): ")? {
        Some(ref conf) if conf == "y" => chain.add_new_transaction(tx),
        _ => println!("transaction discarded, returning to main menu"),
    }
    Ok(())
}

fn show(chain: &Chain) {
    let block = chain.last_block();
    println!("Last block:");
    println!("  Index: {}", block.index);
    println!("  Transactions: {:?}", block.transactions);
    println!("  Time: {}", block.timestamp);
    println!("  Previous hash: {}", block.previous_hash);
    println!("  Hash: {}", block.hash.as_deref().unwrap_or("<unassigned>"));
    println!("  Nonce: {}", block.nonce);
}

fn wallet(store: &FileStore, name: &str) -> Result<()> {
    let matches = transactions_involving(store, name)?;
    if matches.is_empty() {
        println!("no transactions found for {name}");
        return Ok(());
    }
    for m in matches {
        println!(
            "block {}: from {} to {} amount {}",
            m.block_index, m.transaction.from, m.transaction.to, m.transaction.amount
        );
    }
    Ok(())
}

/// Three whitespace-separated fields with an integer amount. Anything else
/// is rejected here, so the chain never sees a malformed record.
fn parse_transaction(line: &str) -> Option<Transaction> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[from, to, amount] = fields.as_slice() else {
        return None;
    };
    let amount: u64 = amount.parse().ok()?;
    Some(Transaction::new(from.to_string(), to.to_string(), amount))
}

fn show_commands() {
    println!("\nEnter \"buy\" to submit a transaction");
    println!("Enter \"mine\" to mine a new block containing the pending transactions");
    println!("Enter \"show\" to show the details of the most recent block");
    println!("Enter \"wallet\" to look up transactions by name");
    println!("\nEnter \"exit\" to exit");
    println!("Enter \"help\" to show these commands");
}

/// Prompt and read one trimmed line; `None` on end of input.
fn prompt(stdin: &io::Stdin, text: &str) -> Result<Option<String>> {
    print!("{text}");
    io::stdout().flush()?;
    let mut line = String::new();
    if stdin.lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}
