//! The template-matching loop and instruction execution.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use xylem_xpath1::{
    Document, EvaluationContext, Expression, FunctionLibraries, NodeRef, Value, evaluate,
};

use crate::ast::{Avt, AvtPart, Binding, CompiledStylesheet, Instruction, MatchRule};
use crate::error::XsltError;
use crate::functions::xslt_library;
use crate::output::{OutputElement, OutputItem, copy_nodes, items_to_fragment, push_item};
use crate::pattern;

/// Per-template execution state: the mode the template was selected under,
/// and whether it is a built-in rule (whose `apply-templates` inherits the
/// current mode instead of clearing it).
#[derive(Debug, Default, Clone)]
struct State {
    mode: Option<String>,
    built_in: bool,
}

pub struct TemplateExecutor<'s> {
    sheet: &'s CompiledStylesheet,
    root: NodeRef,
    functions: FunctionLibraries,
    namespaces: HashMap<String, String>,
    /// Variable binding stacks; the innermost binding of a name wins.
    variables: HashMap<String, Vec<Value>>,
}

impl<'s> TemplateExecutor<'s> {
    pub fn new(sheet: &'s CompiledStylesheet, data: &Document) -> Self {
        let mut namespaces = data.namespaces().clone();
        for (prefix, uri) in &sheet.namespaces {
            namespaces.insert(prefix.clone(), uri.clone());
        }
        TemplateExecutor {
            sheet,
            root: data.root(),
            functions: FunctionLibraries::core().with_library(xslt_library()),
            namespaces,
            variables: HashMap::new(),
        }
    }

    /// Runs the whole transform: top-level bindings, then templates from
    /// the document root, no mode.
    pub fn transform(&mut self) -> Result<Vec<OutputItem>, XsltError> {
        let sheet = self.sheet;
        let root = self.root.clone();
        for top in &sheet.top_level {
            debug!(
                "binding top-level {} '{}'",
                if top.is_param { "param" } else { "variable" },
                top.name
            );
            let value = self.binding_value(&top.binding, &root, 1, 1, &State::default())?;
            self.set_variable(top.name.clone(), value);
        }

        let mut items = self.apply_to_node(&root, 1, 1, None)?;
        if sheet.output_indent {
            for item in &mut items {
                if let OutputItem::Element(element) = item
                    && !element.children.is_empty()
                {
                    element.push(OutputItem::Text("\n".to_string()));
                }
            }
        }
        Ok(items)
    }

    /// Selects and applies the single best-matching template for a node.
    fn apply_to_node(
        &mut self,
        node: &NodeRef,
        position: usize,
        size: usize,
        mode: Option<&str>,
    ) -> Result<Vec<OutputItem>, XsltError> {
        let sheet = self.sheet;
        let Some(index) = self.find_template(node, mode)? else {
            // No rule at all (comments and processing instructions under
            // the built-in set): produce nothing.
            return Ok(Vec::new());
        };
        let template = &sheet.templates[index];
        debug!(
            "template {} ({}built-in) matches {:?}",
            index,
            if template.built_in { "" } else { "not " },
            node
        );
        let state = State {
            mode: mode.map(str::to_string),
            built_in: template.built_in,
        };
        self.execute_body(&template.body, node, position, size, &state, &HashMap::new())
    }

    /// The match contract: collect every rule whose template mode equals
    /// the requested mode and whose pattern matches; built-in rules stand
    /// in when nothing matched, ignoring mode. The maximum priority must
    /// identify one template.
    fn find_template(
        &self,
        node: &NodeRef,
        mode: Option<&str>,
    ) -> Result<Option<usize>, XsltError> {
        let sheet = self.sheet;
        let variables = self.merged_variables();
        let mut candidates: Vec<&MatchRule> = Vec::new();
        for rule in &sheet.match_rules {
            if sheet.templates[rule.template].mode.as_deref() != mode {
                continue;
            }
            if pattern::matches(&rule.pattern, node, &self.functions, &variables, &self.namespaces)? {
                trace!("pattern '{}' matches {:?}", rule.text, node);
                candidates.push(rule);
            }
        }
        if candidates.is_empty() {
            for rule in &sheet.built_in_rules {
                if pattern::matches(&rule.pattern, node, &self.functions, &variables, &self.namespaces)? {
                    candidates.push(rule);
                }
            }
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let best = candidates
            .iter()
            .map(|r| r.priority)
            .fold(f64::NEG_INFINITY, f64::max);
        let top: Vec<&&MatchRule> = candidates.iter().filter(|r| r.priority == best).collect();
        let distinct: HashSet<usize> = top.iter().map(|r| r.template).collect();
        if distinct.len() > 1 {
            return Err(XsltError::AmbiguousTemplate {
                node: format!("{:?}", node),
                priority: best,
                count: distinct.len(),
            });
        }
        Ok(Some(top[0].template))
    }

    /// Executes a body; variables and params bound inside it go out of
    /// scope when it returns, error or not.
    fn execute_body(
        &mut self,
        body: &[Instruction],
        node: &NodeRef,
        position: usize,
        size: usize,
        state: &State,
        params: &HashMap<String, Value>,
    ) -> Result<Vec<OutputItem>, XsltError> {
        let mut items = Vec::new();
        let mut scoped: Vec<String> = Vec::new();
        let mut failure = None;
        for instruction in body {
            if let Err(e) = self.execute_instruction(
                instruction,
                node,
                position,
                size,
                state,
                params,
                &mut items,
                &mut scoped,
            ) {
                failure = Some(e);
                break;
            }
        }
        for name in scoped.iter().rev() {
            self.unset_variable(name);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(items),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_instruction(
        &mut self,
        instruction: &Instruction,
        node: &NodeRef,
        position: usize,
        size: usize,
        state: &State,
        params: &HashMap<String, Value>,
        out: &mut Vec<OutputItem>,
        scoped: &mut Vec<String>,
    ) -> Result<(), XsltError> {
        match instruction {
            Instruction::Text(text) => push_item(out, OutputItem::Text(text.clone())),
            Instruction::ValueOf { select } => {
                let value = self.evaluate(select, node, position, size)?;
                push_item(out, OutputItem::Text(value.to_string()));
            }
            Instruction::ApplyTemplates { select, mode } => {
                let nodes: Vec<NodeRef> = match select {
                    Some(expr) => self
                        .evaluate(expr, node, position, size)?
                        .into_node_set("xsl:apply-templates select")
                        .map_err(XsltError::from)?,
                    None => node.children().collect(),
                };
                // A built-in rule keeps the mode it was reached under.
                let effective = if state.built_in {
                    state.mode.clone()
                } else {
                    mode.clone()
                };
                let total = nodes.len();
                for (i, selected) in nodes.iter().enumerate() {
                    let produced =
                        self.apply_to_node(selected, i + 1, total, effective.as_deref())?;
                    for item in produced {
                        push_item(out, item);
                    }
                }
            }
            Instruction::CallTemplate { name, params: with } => {
                let sheet = self.sheet;
                let Some(&index) = sheet.named.get(name) else {
                    return Err(XsltError::Execution(format!(
                        "no template named '{}'",
                        name
                    )));
                };
                let mut passed = HashMap::new();
                for (param_name, binding) in with {
                    let value = self.binding_value(binding, node, position, size, state)?;
                    passed.insert(param_name.clone(), value);
                }
                let template = &sheet.templates[index];
                let callee_state = State {
                    mode: state.mode.clone(),
                    built_in: template.built_in,
                };
                let produced =
                    self.execute_body(&template.body, node, position, size, &callee_state, &passed)?;
                for item in produced {
                    push_item(out, item);
                }
            }
            Instruction::ForEach { select, body } => {
                let nodes = self
                    .evaluate(select, node, position, size)?
                    .into_node_set("xsl:for-each select")
                    .map_err(XsltError::from)?;
                let total = nodes.len();
                for (i, selected) in nodes.iter().enumerate() {
                    let produced =
                        self.execute_body(body, selected, i + 1, total, state, &HashMap::new())?;
                    for item in produced {
                        push_item(out, item);
                    }
                }
            }
            Instruction::If { test, body } => {
                if self.evaluate(test, node, position, size)?.to_bool() {
                    let produced =
                        self.execute_body(body, node, position, size, state, &HashMap::new())?;
                    for item in produced {
                        push_item(out, item);
                    }
                }
            }
            Instruction::Choose { whens, otherwise } => {
                let mut body = None;
                for when in whens {
                    if self.evaluate(&when.test, node, position, size)?.to_bool() {
                        body = Some(&when.body);
                        break;
                    }
                }
                let chosen = match body {
                    Some(body) => Some(body),
                    None => otherwise.as_ref(),
                };
                if let Some(body) = chosen {
                    let produced =
                        self.execute_body(body, node, position, size, state, &HashMap::new())?;
                    for item in produced {
                        push_item(out, item);
                    }
                }
            }
            Instruction::Variable { name, binding } => {
                let value = self.binding_value(binding, node, position, size, state)?;
                self.set_variable(name.clone(), value);
                scoped.push(name.clone());
            }
            Instruction::Param { name, binding } => {
                let value = match params.get(name) {
                    Some(passed) => passed.clone(),
                    None => self.binding_value(binding, node, position, size, state)?,
                };
                self.set_variable(name.clone(), value);
                scoped.push(name.clone());
            }
            Instruction::CopyOf { select } => {
                match self.evaluate(select, node, position, size)? {
                    Value::NodeSet(nodes) => {
                        for item in copy_nodes(&nodes) {
                            push_item(out, item);
                        }
                    }
                    other => push_item(out, OutputItem::Text(other.to_string())),
                }
            }
            Instruction::Element { name, body } => {
                let name = self.evaluate_avt(name, node, position, size)?;
                let element =
                    self.build_element(name, Vec::new(), body, node, position, size, state)?;
                push_item(out, element);
            }
            Instruction::LiteralElement {
                name,
                attributes,
                body,
            } => {
                let mut evaluated = Vec::with_capacity(attributes.len());
                for (attr_name, avt) in attributes {
                    evaluated
                        .push((attr_name.clone(), self.evaluate_avt(avt, node, position, size)?));
                }
                let element =
                    self.build_element(name.clone(), evaluated, body, node, position, size, state)?;
                push_item(out, element);
            }
            Instruction::Unsupported(what) => {
                return Err(XsltError::UnsupportedFeature(what.clone()));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_element(
        &mut self,
        name: String,
        attributes: Vec<(String, String)>,
        body: &[Instruction],
        node: &NodeRef,
        position: usize,
        size: usize,
        state: &State,
    ) -> Result<OutputItem, XsltError> {
        let produced = self.execute_body(body, node, position, size, state, &HashMap::new())?;
        let mut element = OutputElement::new(name);
        element.attributes = attributes;
        for item in produced {
            if self.sheet.output_indent && matches!(item, OutputItem::Element(_)) {
                element.push(OutputItem::Text("\n".to_string()));
            }
            element.push(item);
        }
        Ok(OutputItem::Element(element))
    }

    /// A `select`-less binding with content becomes a result-tree fragment:
    /// a freshly built tree whose synthetic root enters the node-set.
    fn binding_value(
        &mut self,
        binding: &Binding,
        node: &NodeRef,
        position: usize,
        size: usize,
        state: &State,
    ) -> Result<Value, XsltError> {
        match binding {
            Binding::Select(expr) => self.evaluate(expr, node, position, size),
            Binding::Content(body) => {
                let items =
                    self.execute_body(body, node, position, size, state, &HashMap::new())?;
                let fragment = items_to_fragment(&items, &self.namespaces);
                Ok(Value::NodeSet(vec![fragment.root()]))
            }
            Binding::Empty => Ok(Value::String(String::new())),
        }
    }

    fn evaluate(
        &self,
        expr: &Expression,
        node: &NodeRef,
        position: usize,
        size: usize,
    ) -> Result<Value, XsltError> {
        let variables = self.merged_variables();
        let ctx = EvaluationContext::new(
            node.clone(),
            self.root.clone(),
            &self.functions,
            position,
            size,
            &variables,
            &self.namespaces,
        );
        trace!("evaluating {} at {:?}", expr, node);
        Ok(evaluate(expr, &ctx)?)
    }

    fn evaluate_avt(
        &self,
        avt: &Avt,
        node: &NodeRef,
        position: usize,
        size: usize,
    ) -> Result<String, XsltError> {
        let mut result = String::new();
        for part in &avt.parts {
            match part {
                AvtPart::Literal(text) => result.push_str(text),
                AvtPart::Expr(expr) => {
                    result.push_str(&self.evaluate(expr, node, position, size)?.to_string());
                }
            }
        }
        Ok(result)
    }

    fn set_variable(&mut self, name: String, value: Value) {
        self.variables.entry(name).or_default().push(value);
    }

    fn unset_variable(&mut self, name: &str) {
        if let Some(stack) = self.variables.get_mut(name) {
            stack.pop();
        }
    }

    fn merged_variables(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .filter_map(|(name, stack)| {
                stack.last().map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }
}
