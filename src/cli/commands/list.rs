//! Catalog listing command.

use tokio::runtime::Runtime;

use super::open_catalog;
use crate::config::Config;
use crate::cover::canonical_cover;
use crate::db::Catalog;

/// List cataloged books, optionally for one library
pub fn cmd_list(rt: &Runtime, config: &Config, library: Option<&str>) -> anyhow::Result<()> {
    rt.block_on(async {
        let catalog = open_catalog(config).await?;
        let libraries = catalog.list_libraries().await?;

        let mut shown = 0;
        for lib in libraries.iter().filter(|l| library.is_none_or(|name| l.name == name)) {
            println!("== {} ==", lib.name);
            for book in catalog.list_books(lib.id).await? {
                let detail = catalog.book_detail(book.id).await?;
                let files = catalog.list_files_for_book(book.id).await?;

                let authors = if detail.authors.is_empty() {
                    String::new()
                } else {
                    format!(" by {}", detail.authors.join(", "))
                };
                println!("{}{} [{} file(s)]", book.title, authors, files.len());

                for (name, number) in &detail.series {
                    match number {
                        Some(n) => println!("    series: {name} #{n}"),
                        None => println!("    series: {name}"),
                    }
                }
                if let Some(cover) = canonical_cover(&book, &files) {
                    println!("    cover: {}", cover.display());
                }
                shown += 1;
            }
        }

        if shown == 0 {
            println!("No books cataloged.");
        }
        Ok(())
    })
}
