//! XML text → [`Arch`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::XmlError;
use crate::tree::{Arch, NodeId};

/// Parser switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Drop whitespace-only text and tails (lxml `remove_blank_text`).
    pub remove_blank_text: bool,
}

/// Byte offset → 1-based line lookup.
struct Lines {
    starts: Vec<usize>,
}

impl Lines {
    fn new(src: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }
}

impl Arch {
    /// Parse a document, keeping all text.
    pub fn parse(src: &str) -> Result<Arch, XmlError> {
        Self::parse_with(src, ParseOptions::default())
    }

    pub fn parse_with(src: &str, opts: ParseOptions) -> Result<Arch, XmlError> {
        let lines = Lines::new(src);
        let mut reader = Reader::from_str(src);
        reader.config_mut().trim_text(false);

        let mut arch: Option<Arch> = None;
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            let line = lines.line_of(reader.buffer_position() as usize);
            let event = reader.read_event().map_err(|e| XmlError::Syntax {
                line,
                message: e.to_string(),
            })?;
            match event {
                Event::Start(e) => {
                    let id = open_element(&mut arch, &stack, &e, line)?;
                    stack.push(id);
                }
                Event::Empty(e) => {
                    open_element(&mut arch, &stack, &e, line)?;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|err| XmlError::Syntax {
                        line,
                        message: err.to_string(),
                    })?;
                    push_text(&mut arch, &stack, &text, opts, line)?;
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    push_text(&mut arch, &stack, &text, ParseOptions::default(), line)?;
                }
                Event::Comment(c) => {
                    let content = String::from_utf8_lossy(&c).into_owned();
                    if let (Some(arch), Some(parent)) = (arch.as_mut(), stack.last()) {
                        let id = arch.create_comment(&content);
                        arch.set_line(id, line);
                        arch.append(*parent, id);
                    }
                }
                Event::PI(pi) => {
                    let target = String::from_utf8_lossy(pi.target()).into_owned();
                    let content = String::from_utf8_lossy(pi.content()).trim().to_string();
                    if let (Some(arch), Some(parent)) = (arch.as_mut(), stack.last()) {
                        let content = (!content.is_empty()).then_some(content);
                        let id = arch.create_pi(&target, content);
                        arch.set_line(id, line);
                        arch.append(*parent, id);
                    }
                }
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let (Some(open), Some(arch)) = (stack.last(), arch.as_ref()) {
            return Err(XmlError::Unclosed {
                tag: arch.tag(*open).to_string(),
                line: arch.line(*open),
            });
        }
        arch.ok_or(XmlError::NoRoot)
    }
}

fn open_element(
    arch: &mut Option<Arch>,
    stack: &[NodeId],
    start: &BytesStart<'_>,
    line: usize,
) -> Result<NodeId, XmlError> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let id = match (arch.as_mut(), stack.last()) {
        (None, _) => {
            let mut new = Arch::new(&tag);
            let root = new.root();
            new.set_line(root, line);
            *arch = Some(new);
            root
        }
        (Some(arch), Some(parent)) => {
            let id = arch.create_element(&tag);
            arch.set_line(id, line);
            arch.append(*parent, id);
            id
        }
        (Some(_), None) => return Err(XmlError::MultipleRoots { line }),
    };
    let syntax = |message: String| XmlError::Syntax { line, message };
    for attr in start.attributes() {
        let attr = attr.map_err(|e| syntax(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| syntax(e.to_string()))?;
        if let Some(arch) = arch.as_mut() {
            arch.set(id, &key, value.into_owned());
        }
    }
    Ok(id)
}

fn push_text(
    arch: &mut Option<Arch>,
    stack: &[NodeId],
    text: &str,
    opts: ParseOptions,
    line: usize,
) -> Result<(), XmlError> {
    let blank = text.trim().is_empty();
    let (Some(arch), Some(parent)) = (arch.as_mut(), stack.last()) else {
        if blank {
            return Ok(());
        }
        return Err(XmlError::TextOutsideRoot { line });
    };
    if blank && opts.remove_blank_text {
        return Ok(());
    }
    let parent = *parent;
    match arch.children(parent).last().copied() {
        Some(last) => {
            let tail = arch.tail(last).unwrap_or_default().to_string() + text;
            arch.set_tail(last, Some(tail));
        }
        None => {
            let lead = arch.text(parent).unwrap_or_default().to_string() + text;
            arch.set_text(parent, Some(lead));
        }
    }
    Ok(())
}
