//! Symbol table derivation.
//!
//! The staged image carries a plain-text symbol table next to the kernel so
//! the kernel's stack tracer can resolve return addresses post mortem. The
//! format is nm-like, one `<hex-address> <kind> <name>` line per symbol,
//! sorted ascending by address. The consumer scans forward and stops at the
//! first address past its target, so ordering is part of the contract.
//!
//! A kernel with no symbols at all produces an empty table, not an error;
//! stripped release builds are still imageable.

use anyhow::{Context, Result};
use object::{Object, ObjectSymbol, SymbolKind};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSymbol {
    pub address: u64,
    pub kind: char,
    pub name: String,
}

/// Extract defined, named symbols from an ELF image, sorted by address.
pub fn collect_symbols(data: &[u8]) -> Result<Vec<KernelSymbol>> {
    let file = object::File::parse(data).context("parsing kernel ELF")?;

    let mut symbols = Vec::new();
    for sym in file.symbols() {
        if sym.is_undefined() {
            continue;
        }
        if matches!(sym.kind(), SymbolKind::Section | SymbolKind::File) {
            continue;
        }
        let name = match sym.name() {
            Ok(name) if !name.is_empty() => name,
            _ => continue,
        };
        symbols.push(KernelSymbol {
            address: sym.address(),
            kind: kind_char(sym.kind(), sym.is_global()),
            name: name.to_string(),
        });
    }

    symbols.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
    Ok(symbols)
}

fn kind_char(kind: SymbolKind, global: bool) -> char {
    let c = match kind {
        SymbolKind::Text => 't',
        SymbolKind::Data => 'd',
        _ => '?',
    };
    if global {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

/// Render symbols in the on-disc table format.
pub fn render_symbol_table(symbols: &[KernelSymbol]) -> String {
    let mut out = String::new();
    for sym in symbols {
        out.push_str(&format!("{:016x} {} {}\n", sym.address, sym.kind, sym.name));
    }
    out
}

/// Derive the symbol table from `kernel` and write it to `dest`.
///
/// Returns the number of symbols written.
pub fn write_symbol_table(kernel: &Path, dest: &Path) -> Result<usize> {
    let data =
        fs::read(kernel).with_context(|| format!("reading kernel ELF '{}'", kernel.display()))?;
    let symbols = collect_symbols(&data)
        .with_context(|| format!("deriving symbol table from '{}'", kernel.display()))?;
    fs::write(dest, render_symbol_table(&symbols))
        .with_context(|| format!("writing symbol table '{}'", dest.display()))?;
    Ok(symbols.len())
}

/// Build a small ELF carrying the given text symbols. Test support, shared
/// with the staging assembler's tests.
#[cfg(test)]
pub(crate) fn sample_kernel(symbols: &[(&str, u64)]) -> Vec<u8> {
    use object::write::{Object as WriteObject, StandardSection, Symbol, SymbolSection};
    use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolScope};

    let mut obj = WriteObject::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    for (name, addr) in symbols {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: *addr,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }
    obj.write().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn symbols_come_out_sorted_by_address() {
        let elf = sample_kernel(&[("late", 0x2000), ("early", 0x1000), ("middle", 0x1800)]);
        let symbols = collect_symbols(&elf).unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
        assert!(symbols.windows(2).all(|w| w[0].address <= w[1].address));
    }

    #[test]
    fn symbolless_kernel_yields_empty_table() {
        let elf = sample_kernel(&[]);
        let symbols = collect_symbols(&elf).unwrap();
        assert!(symbols.is_empty());
        assert_eq!(render_symbol_table(&symbols), "");
    }

    #[test]
    fn rendered_lines_are_parseable_addresses() {
        let elf = sample_kernel(&[("kmain", 0xffff_8000_0010_4242)]);
        let symbols = collect_symbols(&elf).unwrap();
        let table = render_symbol_table(&symbols);
        let line = table.lines().next().unwrap();
        let mut fields = line.split_whitespace();
        let addr = u64::from_str_radix(fields.next().unwrap(), 16).unwrap();
        assert_eq!(addr, 0xffff_8000_0010_4242);
        let _kind = fields.next().unwrap();
        assert_eq!(fields.next().unwrap(), "kmain");
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(collect_symbols(b"not an elf at all").is_err());
    }

    #[test]
    fn write_symbol_table_creates_the_artifact() {
        let temp = TempDir::new().unwrap();
        let kernel = temp.path().join("kernel");
        let table = temp.path().join("kernel.symbols");
        fs::write(&kernel, sample_kernel(&[("a", 1), ("b", 2)])).unwrap();

        let count = write_symbol_table(&kernel, &table).unwrap();
        assert_eq!(count, 2);
        assert_eq!(fs::read_to_string(&table).unwrap().lines().count(), 2);
    }

    #[test]
    fn empty_table_artifact_is_present_but_zero_length() {
        let temp = TempDir::new().unwrap();
        let kernel = temp.path().join("kernel");
        let table = temp.path().join("kernel.symbols");
        fs::write(&kernel, sample_kernel(&[])).unwrap();

        let count = write_symbol_table(&kernel, &table).unwrap();
        assert_eq!(count, 0);
        assert!(table.exists());
        assert_eq!(fs::metadata(&table).unwrap().len(), 0);
    }
}
