use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use sandpatch::client::AppliedPatchInfo;
use sandpatch::format::PatchFile;
use sandpatch::wire::Status;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    status: &'a str,
    code: i64,
}

pub fn print_status(context: &str, status: Status, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = StatusOutput {
                status: if status.is_ok() { "ok" } else { "refused" },
                code: status.code(),
            };
            println!("{}", to_json(&out));
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{context}: {status}");
        }
    }
}

#[derive(Serialize)]
struct AppliedOutput<'a> {
    name: &'a str,
    content_hash: String,
}

pub fn print_applied_list(entries: &[AppliedPatchInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = entries
                .iter()
                .map(|e| AppliedOutput {
                    name: &e.name,
                    content_hash: e.content_hash_hex(),
                })
                .collect();
            println!("{}", to_json(&rows));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "CONTENT HASH"]);
            for entry in entries {
                table.add_row(vec![entry.name.clone(), entry.content_hash_hex()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for entry in entries {
                println!("{} {}", entry.content_hash_hex(), entry.name);
            }
        }
    }
}

#[derive(Serialize)]
struct PatchFileOutput<'a> {
    file_hash: String,
    target_version: &'a str,
    target_compile_date: &'a str,
    blob_len: usize,
    relocations: usize,
    functions: Vec<FunctionOutput<'a>>,
}

#[derive(Serialize)]
struct FunctionOutput<'a> {
    name: &'a str,
    old_addr: String,
    entry_offset: u32,
}

pub fn print_patch_file(file: &PatchFile, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PatchFileOutput {
                file_hash: hex::encode(file.file_hash),
                target_version: &file.target_version,
                target_compile_date: &file.target_compile_date,
                blob_len: file.blob.len(),
                relocations: file.relocations.len(),
                functions: file
                    .functions
                    .iter()
                    .map(|f| FunctionOutput {
                        name: &f.name,
                        old_addr: format!("{:#x}", f.old_addr),
                        entry_offset: f.new_rel_offset,
                    })
                    .collect(),
            };
            println!("{}", to_json(&out));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FUNCTION", "OLD ADDR", "ENTRY OFFSET"]);
            for func in &file.functions {
                table.add_row(vec![
                    func.name.clone(),
                    format!("{:#x}", func.old_addr),
                    func.new_rel_offset.to_string(),
                ]);
            }
            println!(
                "hash={} target={} ({}) blob={}B relocs={}",
                hex::encode(file.file_hash),
                file.target_version,
                file.target_compile_date,
                file.blob.len(),
                file.relocations.len()
            );
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("hash: {}", hex::encode(file.file_hash));
            println!("target: {} ({})", file.target_version, file.target_compile_date);
            println!("blob: {} bytes, {} relocations", file.blob.len(), file.relocations.len());
            for func in &file.functions {
                println!(
                    "  {} @ {:#x} (+{})",
                    func.name, func.old_addr, func.new_rel_offset
                );
            }
        }
    }
}

pub fn print_text_block(block: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Block<'a> {
                build_info: &'a str,
            }
            println!("{}", to_json(&Block { build_info: block }));
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            print!("{block}");
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
