//! Job-manifest generation for farm submission.
//!
//! The manifest is a build-project XML document: one property group of
//! build metadata, one correlation-payload reference, and one work item per
//! assembly embedding its escaped command line. Rendering is a pure
//! function of its inputs so it can be tested without touching the
//! environment or the network.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::CorrelationPayload;
use super::env::FarmEnvironment;
use crate::assembly::AssemblyInfo;
use crate::executor::AssemblyExecutor;

/// Render the job manifest for the given assembly set.
///
/// Command lines come from the executor seam, so a work item reproduces
/// exactly what the local strategy would have run; XML escaping of commands
/// and names is handled by the writer.
pub fn render(
    assemblies: &[AssemblyInfo],
    executor: &dyn AssemblyExecutor,
    env: &FarmEnvironment,
    payload: &CorrelationPayload,
) -> anyhow::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut project = BytesStart::new("Project");
    project.push_attribute(("DefaultTargets", "Test"));
    writer.write_event(Event::Start(project))?;

    // Build metadata the farm uses for attribution and routing.
    writer.write_event(Event::Start(BytesStart::new("PropertyGroup")))?;
    write_property(&mut writer, "SourceBranch", &env.source_branch)?;
    write_property(&mut writer, "Repository", &env.repository)?;
    write_property(&mut writer, "TeamProject", &env.team_project)?;
    write_property(&mut writer, "BuildReason", &env.build_reason)?;
    write_property(&mut writer, "BuildNumber", &env.build_number)?;
    writer.write_event(Event::End(BytesEnd::new("PropertyGroup")))?;

    writer.write_event(Event::Start(BytesStart::new("ItemGroup")))?;

    let mut correlation = BytesStart::new("CorrelationPayload");
    correlation.push_attribute(("Include", payload.location().as_str()));
    writer.write_event(Event::Empty(correlation))?;

    for assembly in assemblies {
        let mut work_item = BytesStart::new("WorkItem");
        work_item.push_attribute(("Include", assembly.display_name.as_str()));
        writer.write_event(Event::Start(work_item))?;

        writer.write_event(Event::Start(BytesStart::new("Command")))?;
        writer.write_event(Event::Text(BytesText::new(
            &executor.command_line_for(assembly),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("Command")))?;

        writer.write_event(Event::End(BytesEnd::new("WorkItem")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("ItemGroup")))?;
    writer.write_event(Event::End(BytesEnd::new("Project")))?;

    let xml = String::from_utf8(writer.into_inner())?;
    Ok(xml)
}

fn write_property<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> anyhow::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
