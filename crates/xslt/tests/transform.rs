//! End-to-end transforms through the public API.

use xylem_xslt::{XsltError, transform};

fn sheet(body: &str) -> String {
    format!(
        "<xsl:stylesheet version=\"1.0\" xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\">{}</xsl:stylesheet>",
        body
    )
}

#[test]
fn apply_templates_builds_the_result_tree() {
    let stylesheet = sheet(
        r#"<xsl:template match="/"><out><xsl:apply-templates/></out></xsl:template>
           <xsl:template match="item"><i><xsl:value-of select="."/></i></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<doc><item>a</item><item>b</item></doc>").unwrap();
    assert_eq!(result, "<out><i>a</i><i>b</i></out>");
}

#[test]
fn built_in_templates_recurse_and_emit_text() {
    let stylesheet = sheet(r#"<xsl:template match="skipme"/>"#);
    let result = transform(
        &stylesheet,
        "<doc>one<skipme>hidden</skipme>two</doc>",
    )
    .unwrap();
    assert_eq!(result, "onetwo");
}

#[test]
fn for_each_runs_with_positional_context() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">
             <out><xsl:for-each select="//n">
               <v p="{position()}"><xsl:value-of select="."/></v>
             </xsl:for-each></out>
           </xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d><n>x</n><n>y</n></d>").unwrap();
    assert_eq!(result, "<out><v p=\"1\">x</v><v p=\"2\">y</v></out>");
}

#[test]
fn choose_picks_first_true_when() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">
             <xsl:for-each select="//v">
               <xsl:choose>
                 <xsl:when test=". &gt; 10">big</xsl:when>
                 <xsl:when test=". &gt; 5">medium</xsl:when>
                 <xsl:otherwise>small</xsl:otherwise>
               </xsl:choose>
               <xsl:text>;</xsl:text>
             </xsl:for-each>
           </xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d><v>20</v><v>7</v><v>1</v></d>").unwrap();
    assert_eq!(result, "big;medium;small;");
}

#[test]
fn call_template_binds_and_restores_params() {
    let stylesheet = sheet(
        r#"<xsl:template name="greet">
             <xsl:param name="who" select="'nobody'"/>
             <p><xsl:value-of select="$who"/></p>
           </xsl:template>
           <xsl:template match="/">
             <out>
               <xsl:call-template name="greet">
                 <xsl:with-param name="who" select="'world'"/>
               </xsl:call-template>
               <xsl:call-template name="greet"/>
             </out>
           </xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d/>").unwrap();
    assert_eq!(result, "<out><p>world</p><p>nobody</p></out>");
}

#[test]
fn variables_scope_to_their_body() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">
             <xsl:variable name="x" select="'outer'"/>
             <xsl:for-each select="//i">
               <xsl:variable name="x" select="string(.)"/>
               <v><xsl:value-of select="$x"/></v>
             </xsl:for-each>
             <v><xsl:value-of select="$x"/></v>
           </xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d><i>a</i></d>").unwrap();
    assert_eq!(result, "<v>a</v><v>outer</v>");
}

#[test]
fn content_variables_are_result_tree_fragments() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">
             <xsl:variable name="frag"><w id="1">inner</w></xsl:variable>
             <out>
               <xsl:value-of select="$frag"/>
               <xsl:copy-of select="$frag"/>
             </out>
           </xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d/>").unwrap();
    assert_eq!(result, "<out>inner<w id=\"1\">inner</w></out>");
}

#[test]
fn copy_of_deep_copies_selected_nodes() {
    let stylesheet = sheet(
        r#"<xsl:template match="/"><out><xsl:copy-of select="//keep"/></out></xsl:template>"#,
    );
    let result = transform(
        &stylesheet,
        "<d><keep a=\"1\"><sub>s</sub></keep><drop/><keep>t</keep></d>",
    )
    .unwrap();
    assert_eq!(result, "<out><keep a=\"1\"><sub>s</sub></keep><keep>t</keep></out>");
}

#[test]
fn xsl_element_builds_from_avt_name() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">
             <xsl:element name="{concat('el', 'em')}">x</xsl:element>
           </xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d/>").unwrap();
    assert_eq!(result, "<elem>x</elem>");
}

#[test]
fn modes_select_independent_rule_sets() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">
             <out>
               <xsl:apply-templates select="//i"/>
               <xsl:apply-templates select="//i" mode="loud"/>
             </out>
           </xsl:template>
           <xsl:template match="i"><q><xsl:value-of select="."/></q></xsl:template>
           <xsl:template match="i" mode="loud"><Q><xsl:value-of select="."/></Q></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d><i>a</i></d>").unwrap();
    assert_eq!(result, "<out><q>a</q><Q>a</Q></out>");
}

#[test]
fn priorities_pick_the_most_specific_rule() {
    let stylesheet = sheet(
        r#"<xsl:template match="/"><xsl:apply-templates select="//b"/></xsl:template>
           <xsl:template match="*">any</xsl:template>
           <xsl:template match="b">named</xsl:template>"#,
    );
    // Name test (0) beats wildcard (-0.5).
    let result = transform(&stylesheet, "<a><b/></a>").unwrap();
    assert_eq!(result, "named");

    let stylesheet = sheet(
        r#"<xsl:template match="/"><xsl:apply-templates select="//b"/></xsl:template>
           <xsl:template match="*" priority="3">any</xsl:template>
           <xsl:template match="b">named</xsl:template>"#,
    );
    let result = transform(&stylesheet, "<a><b/></a>").unwrap();
    assert_eq!(result, "any");
}

#[test]
fn equal_priority_matches_are_ambiguous() {
    let stylesheet = sheet(
        r#"<xsl:template match="/"><xsl:apply-templates select="//b"/></xsl:template>
           <xsl:template match="b">one</xsl:template>
           <xsl:template match="b">two</xsl:template>"#,
    );
    let result = transform(&stylesheet, "<a><b/></a>");
    assert!(matches!(result, Err(XsltError::AmbiguousTemplate { .. })));
}

#[test]
fn attribute_value_templates_in_literal_elements() {
    let stylesheet = sheet(
        r#"<xsl:template match="item">
             <row id="{@id}" label="{{literal}}"><xsl:value-of select="."/></row>
           </xsl:template>
           <xsl:template match="/"><t><xsl:apply-templates select="//item"/></t></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d><item id=\"i1\">v</item></d>").unwrap();
    assert_eq!(result, "<t><row id=\"i1\" label=\"{literal}\">v</row></t>");
}

#[test]
fn strip_space_removes_listed_whitespace() {
    let stylesheet = sheet(
        r#"<xsl:strip-space elements="d"/>
           <xsl:template match="/"><o><xsl:apply-templates/></o></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d>\n  <i>a</i>\n  <i>b</i>\n</d>").unwrap();
    assert_eq!(result, "<o>ab</o>");

    // Without the strip list the whitespace flows through.
    let stylesheet = sheet(r#"<xsl:template match="/"><o><xsl:apply-templates/></o></xsl:template>"#);
    let result = transform(&stylesheet, "<d>\n  <i>a</i>\n</d>").unwrap();
    assert_eq!(result, "<o>\n  a\n</o>");
}

#[test]
fn top_level_variables_are_visible_everywhere() {
    let stylesheet = sheet(
        r#"<xsl:variable name="title" select="'T'"/>
           <xsl:template match="/"><h><xsl:value-of select="$title"/></h></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d/>").unwrap();
    assert_eq!(result, "<h>T</h>");
}

#[test]
fn unsupported_instructions_fail_only_when_executed() {
    let stylesheet = sheet(
        r#"<xsl:template match="/">ok</xsl:template>
           <xsl:template match="never"><xsl:sort/></xsl:template>"#,
    );
    assert_eq!(transform(&stylesheet, "<d/>").unwrap(), "ok");

    let stylesheet = sheet(
        r#"<xsl:template match="/"><xsl:sort/></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d/>");
    assert!(matches!(result, Err(e) if e.is_unsupported()));
}

#[test]
fn output_indent_adds_newlines_inside_elements() {
    let stylesheet = sheet(
        r#"<xsl:output indent="yes"/>
           <xsl:template match="/"><out><a/><b/></out></xsl:template>"#,
    );
    let result = transform(&stylesheet, "<d/>").unwrap();
    assert_eq!(result, "<out>\n<a/>\n<b/>\n</out>");
}

#[test]
fn text_output_escapes_markup_characters() {
    let stylesheet = sheet(r#"<xsl:template match="/"><o><xsl:value-of select="//v"/></o></xsl:template>"#);
    let result = transform(&stylesheet, "<d><v>a &lt; b &amp; c</v></d>").unwrap();
    assert_eq!(result, "<o>a &lt; b &amp; c</o>");
}
